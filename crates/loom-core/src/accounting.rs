// SPDX-License-Identifier: Apache-2.0
//! Turns a running cumulative token total into a per-turn delta.
//!
//! No provider wire format actually reports totals since the session
//! began — each streamed response reports that turn's own usage (and, for
//! providers that stream multiple usage updates per turn such as Gemini,
//! each chunk's usage is cumulative *for that turn only* and supersedes the
//! last). The agent loop folds each turn's resolved usage into a
//! session-wide running total and hands that running total to
//! [`TokenAccountant::record`], which is the one place that owns the
//! subtraction — so the turn-to-turn delta, the cache-hit ratio, and the
//! session summary are all derived the same way regardless of what the
//! underlying provider actually sends.

use serde::{Deserialize, Serialize};

/// The running session-cumulative counters fed into [`TokenAccountant::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeUsage {
    pub prompt_total: u64,
    pub response_total: u64,
    pub cached_total: u64,
    pub cache_write_total: u64,
    pub thought_total: u64,
    pub tool_use_total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDeltas {
    pub prompt_delta: u64,
    pub response_delta: u64,
    pub cached_delta: u64,
    pub cache_write_delta: u64,
    pub thought_delta: u64,
    pub tool_use_delta: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheLabel {
    Excellent,
    Good,
    Modest,
    Minimal,
}

impl CacheLabel {
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.80 {
            CacheLabel::Excellent
        } else if ratio >= 0.50 {
            CacheLabel::Good
        } else if ratio >= 0.20 {
            CacheLabel::Modest
        } else {
            CacheLabel::Minimal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TurnUsageSnapshot {
    pub deltas: UsageDeltas,
    pub totals: CumulativeUsageSnapshot,
    pub cache_hit_ratio: f64,
    pub cache_label: CacheLabel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeUsageSnapshot {
    pub prompt_total: u64,
    pub response_total: u64,
    pub cached_total: u64,
    pub cache_write_total: u64,
    pub thought_total: u64,
    pub tool_use_total: u64,
}

impl From<CumulativeUsage> for CumulativeUsageSnapshot {
    fn from(u: CumulativeUsage) -> Self {
        Self {
            prompt_total: u.prompt_total,
            response_total: u.response_total,
            cached_total: u.cached_total,
            cache_write_total: u.cache_write_total,
            thought_total: u.thought_total,
            tool_use_total: u.tool_use_total,
        }
    }
}

/// Accumulated stats across every turn in a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionUsageSummary {
    pub requests: u64,
    pub total_prompt_tokens: u64,
    pub total_response_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_cache_write_tokens: u64,
    pub total_thought_tokens: u64,
    pub total_tool_use_tokens: u64,
}

impl SessionUsageSummary {
    fn accumulate(&mut self, deltas: &UsageDeltas) {
        self.requests += 1;
        self.total_prompt_tokens += deltas.prompt_delta;
        self.total_response_tokens += deltas.response_delta;
        self.total_cached_tokens += deltas.cached_delta;
        self.total_cache_write_tokens += deltas.cache_write_delta;
        self.total_thought_tokens += deltas.thought_delta;
        self.total_tool_use_tokens += deltas.tool_use_delta;
    }
}

/// Tracks `previous_*_total` for one session and turns each new cumulative
/// report into a non-negative per-turn delta.
#[derive(Debug, Clone, Default)]
pub struct TokenAccountant {
    previous: CumulativeUsage,
    summary: SessionUsageSummary,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new cumulative usage report and return the per-turn
    /// snapshot. If the backend's totals ever go backwards (a counter
    /// reset), the new totals become the baseline for the next delta and
    /// this turn's delta is clamped to zero rather than going negative.
    pub fn record(&mut self, current: CumulativeUsage) -> TurnUsageSnapshot {
        let deltas = UsageDeltas {
            prompt_delta: saturating_delta(current.prompt_total, self.previous.prompt_total),
            response_delta: saturating_delta(current.response_total, self.previous.response_total),
            cached_delta: saturating_delta(current.cached_total, self.previous.cached_total),
            cache_write_delta: saturating_delta(current.cache_write_total, self.previous.cache_write_total),
            thought_delta: saturating_delta(current.thought_total, self.previous.thought_total),
            tool_use_delta: saturating_delta(current.tool_use_total, self.previous.tool_use_total),
        };
        self.previous = current;
        self.summary.accumulate(&deltas);

        let denom = deltas.cached_delta + deltas.prompt_delta + deltas.response_delta + deltas.thought_delta;
        let ratio = if denom == 0 {
            0.0
        } else {
            deltas.cached_delta as f64 / denom as f64
        };

        TurnUsageSnapshot {
            deltas,
            totals: current.into(),
            cache_hit_ratio: ratio,
            cache_label: CacheLabel::from_ratio(ratio),
        }
    }

    pub fn session_summary(&self) -> SessionUsageSummary {
        self.summary
    }
}

fn saturating_delta(current: u64, previous: u64) -> u64 {
    current.saturating_sub(previous)
}
