// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use loom_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Maximum output tokens the current model's catalog entry advertises.
    /// Reserved out of `max_tokens` when computing [`Session::input_budget`].
    pub max_output_tokens: usize,
    /// Estimated tokens consumed by tool schemas and the dynamic context
    /// block sent with every request but not stored in `messages`.
    pub schema_overhead: usize,
    /// Cumulative cache-read tokens reported by the backend this session.
    pub cache_read_total: u64,
    /// Cumulative cache-write tokens reported by the backend this session.
    pub cache_write_total: u64,
    /// Correction factor applied to the chars/4 token estimate, refined each
    /// turn from the backend's actual reported input token count.
    pub calibration_factor: f32,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            cache_read_total: 0,
            cache_write_total: 0,
            calibration_factor: 1.0,
        }
    }

    /// Tokens available for session input: the context window minus the
    /// output reserve and the current schema/dynamic-context overhead,
    /// scaled by the running calibration factor.
    pub fn input_budget(&self) -> usize {
        let raw = self
            .max_tokens
            .saturating_sub(self.max_output_tokens)
            .saturating_sub(self.schema_overhead);
        ((raw as f32) / self.calibration_factor.max(0.1)) as usize
    }

    /// Record cache usage deltas reported by the backend for this turn.
    pub fn add_cache_usage(&mut self, cache_read: u64, cache_write: u64) {
        self.cache_read_total += cache_read;
        self.cache_write_total += cache_write;
    }

    /// Nudge the calibration factor toward `actual_input / estimated` so the
    /// chars/4 approximation tracks the real tokenizer for this workload.
    /// Uses an exponential moving average so a single noisy turn cannot
    /// swing the budget calculation.
    pub fn update_calibration(&mut self, actual_input: u64, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let observed = actual_input as f32 / estimated as f32;
        if !observed.is_finite() || observed <= 0.0 {
            return;
        }
        const ALPHA: f32 = 0.2;
        self.calibration_factor = (1.0 - ALPHA) * self.calibration_factor + ALPHA * observed;
        self.calibration_factor = self.calibration_factor.clamp(0.25, 4.0);
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use loom_model::Message;
    use super::*;

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn new_session_has_unique_id() {
        let a = Session::new(1000);
        let b = Session::new(1000);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_session_starts_empty() {
        let s = Session::new(1000);
        assert!(s.messages.is_empty());
        assert_eq!(s.token_count, 0);
    }

    // ── Token accounting ──────────────────────────────────────────────────────

    #[test]
    fn push_increments_token_count() {
        let mut s = Session::new(1000);
        // "12345678" = 8 chars → 2 tokens
        s.push(Message::user("12345678"));
        assert_eq!(s.token_count, 2);
    }

    #[test]
    fn push_many_accumulates_tokens() {
        let mut s = Session::new(10_000);
        s.push_many([
            Message::user("12345678"),  // 2 tokens
            Message::assistant("abcd"), // 1 token
        ]);
        assert_eq!(s.token_count, 3);
    }

    #[test]
    fn recalculate_tokens_matches_push_sum() {
        let mut s = Session::new(1000);
        s.push(Message::user("hello world")); // 11 chars → 2 tokens
        let after_push = s.token_count;
        s.recalculate_tokens();
        assert_eq!(s.token_count, after_push);
    }

    #[test]
    fn recalculate_after_manual_drain_resets_to_zero() {
        let mut s = Session::new(1000);
        s.push(Message::user("text"));
        s.messages.clear();
        s.recalculate_tokens();
        assert_eq!(s.token_count, 0);
    }

    #[test]
    fn replace_messages_sets_messages_and_recalculates_tokens() {
        let mut s = Session::new(1000);
        s.push(Message::user("first"));
        s.push(Message::assistant("reply"));
        assert_eq!(s.messages.len(), 2);
        let new_msgs = vec![Message::user("only")];
        s.replace_messages(new_msgs.clone());
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].as_text(), Some("only"));
        assert_eq!(s.token_count, 1); // "only" → 1 token
    }

    // ── Context fraction ──────────────────────────────────────────────────────

    #[test]
    fn context_fraction_zero_when_empty() {
        let s = Session::new(1000);
        assert_eq!(s.context_fraction(), 0.0);
    }

    #[test]
    fn context_fraction_at_zero_max_does_not_panic() {
        let s = Session::new(0);
        assert_eq!(s.context_fraction(), 0.0);
    }

    #[test]
    fn context_fraction_increases_with_messages() {
        let mut s = Session::new(100);
        let before = s.context_fraction();
        s.push(Message::user("a long message that uses more tokens"));
        assert!(s.context_fraction() > before);
    }

    // ── Near-limit detection ──────────────────────────────────────────────────

    #[test]
    fn is_near_limit_false_when_empty() {
        let s = Session::new(1000);
        assert!(!s.is_near_limit(0.8));
    }

    #[test]
    fn is_near_limit_true_when_over_threshold() {
        let mut s = Session::new(4); // tiny window
        // Each char = 0.25 tokens; need 0.8 × 4 = 3.2 tokens → 13 chars
        s.push(Message::user("1234567890123")); // 13 chars = 3 tokens (floor) in 4-token window = 75%
        // Actually: 13/4 = 3 tokens; fraction = 3/4 = 0.75 < 0.8 → not near
        // Push one more to push it over
        s.push(Message::user("abcd")); // 1 more → 4 tokens, fraction = 1.0 ≥ 0.8
        assert!(s.is_near_limit(0.8));
    }

    #[test]
    fn is_near_limit_exactly_at_threshold() {
        let mut s = Session::new(10);
        // Need token_count / max_tokens ≥ threshold (0.5)
        // Fill exactly 5 tokens: 5*4=20 chars
        s.push(Message::user("12345678901234567890")); // 20 chars = 5 tokens
        assert!(s.is_near_limit(0.5));
        assert!(!s.is_near_limit(0.6));
    }

    // ── Input budget ─────────────────────────────────────────────────────────

    #[test]
    fn input_budget_subtracts_output_reserve_and_overhead() {
        let mut s = Session::new(1000);
        s.max_output_tokens = 200;
        s.schema_overhead = 100;
        assert_eq!(s.input_budget(), 700);
    }

    #[test]
    fn input_budget_never_underflows() {
        let mut s = Session::new(100);
        s.max_output_tokens = 500;
        assert_eq!(s.input_budget(), 0);
    }

    #[test]
    fn input_budget_scales_with_calibration_factor() {
        let mut s = Session::new(1000);
        s.calibration_factor = 2.0;
        assert_eq!(s.input_budget(), 500);
    }

    // ── Cache usage ──────────────────────────────────────────────────────────

    #[test]
    fn add_cache_usage_accumulates() {
        let mut s = Session::new(1000);
        s.add_cache_usage(10, 5);
        s.add_cache_usage(3, 2);
        assert_eq!(s.cache_read_total, 13);
        assert_eq!(s.cache_write_total, 7);
    }

    // ── Calibration ──────────────────────────────────────────────────────────

    #[test]
    fn update_calibration_moves_toward_observed_ratio() {
        let mut s = Session::new(1000);
        let before = s.calibration_factor;
        s.update_calibration(200, 100); // observed ratio 2.0, above 1.0 default
        assert!(s.calibration_factor > before);
    }

    #[test]
    fn update_calibration_ignores_zero_estimate() {
        let mut s = Session::new(1000);
        s.update_calibration(50, 0);
        assert_eq!(s.calibration_factor, 1.0);
    }

    #[test]
    fn update_calibration_clamps_to_bounds() {
        let mut s = Session::new(1000);
        for _ in 0..50 {
            s.update_calibration(1000, 1); // wildly high ratio every turn
        }
        assert!(s.calibration_factor <= 4.0);
    }
}
