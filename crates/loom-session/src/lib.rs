// SPDX-License-Identifier: Apache-2.0
//! Durable, per-`(app_name, user_id, session_id)` event log.
//!
//! One JSONL file per session under the XDG data dir; an `index.json`
//! per user tracks session metadata so `list` doesn't have to open every
//! log to sort by last-modified.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("storage failed: {0}")]
    StorageFailed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

// ─── Data model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    Tool,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EventPayload {
    Text { text: String },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: BTreeMap<String, Value>,
    },
    ToolResult {
        call_id: String,
        success: bool,
        output: Value,
        error: Option<String>,
    },
    Thinking { text: String },
    CompactionSummary { summary: String, replaced_count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageSnapshot {
    pub prompt_delta: u64,
    pub response_delta: u64,
    pub cached_delta: u64,
    pub thought_delta: u64,
    pub tool_use_delta: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_ref: String,
    pub role: Role,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub usage: Option<TokenUsageSnapshot>,
}

impl Event {
    pub fn new(session_ref: impl Into<String>, role: Role, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_ref: session_ref.into(),
            role,
            payload,
            timestamp: Utc::now(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsageSnapshot) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub state: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl SessionMeta {
    fn key(&self) -> String {
        session_key(&self.app_name, &self.user_id, &self.session_id)
    }
}

fn session_key(app_name: &str, user_id: &str, session_id: &str) -> String {
    format!("{app_name}/{user_id}/{session_id}")
}

// ─── Store ─────────────────────────────────────────────────────────────────

/// File-backed session store rooted at the XDG data directory
/// (`$XDG_DATA_HOME/loom/sessions`, or an explicit override for tests).
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new() -> Result<Self> {
        let root = dirs::data_dir()
            .ok_or_else(|| SessionError::StorageFailed("no XDG data directory".into()))?
            .join("loom")
            .join("sessions");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn user_dir(&self, app_name: &str, user_id: &str) -> PathBuf {
        self.root.join(app_name).join(user_id)
    }

    fn session_path(&self, app_name: &str, user_id: &str, session_id: &str) -> PathBuf {
        self.user_dir(app_name, user_id)
            .join(format!("{session_id}.jsonl"))
    }

    fn index_path(&self, app_name: &str, user_id: &str) -> PathBuf {
        self.user_dir(app_name, user_id).join("index.json")
    }

    fn load_index(&self, app_name: &str, user_id: &str) -> Result<BTreeMap<String, SessionMeta>> {
        let path = self.index_path(app_name, user_id);
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    fn save_index(&self, app_name: &str, user_id: &str, index: &BTreeMap<String, SessionMeta>) -> Result<()> {
        let dir = self.user_dir(app_name, user_id);
        fs::create_dir_all(&dir)?;
        let path = self.index_path(app_name, user_id);
        atomic_write_json(&path, index)
    }

    /// Create a new, empty session. Fails if one already exists with the
    /// same `(app_name, user_id, session_id)` triple.
    pub fn create(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<SessionMeta> {
        let path = self.session_path(app_name, user_id, session_id);
        if path.exists() {
            return Err(SessionError::StorageFailed(format!(
                "session already exists: {}",
                session_key(app_name, user_id, session_id)
            )));
        }
        fs::create_dir_all(self.user_dir(app_name, user_id))?;
        File::create(&path)?;

        let now = Utc::now();
        let meta = SessionMeta {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            state: BTreeMap::new(),
            created_at: now,
            last_modified: now,
        };

        let mut index = self.load_index(app_name, user_id)?;
        index.insert(meta.key(), meta.clone());
        self.save_index(app_name, user_id, &index)?;
        Ok(meta)
    }

    pub fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<SessionMeta> {
        let index = self.load_index(app_name, user_id)?;
        index
            .get(&session_key(app_name, user_id, session_id))
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_key(app_name, user_id, session_id)))
    }

    /// Rewrite a session's `state` map whole (no partial merge) and bump
    /// `last_modified`.
    pub fn set_state(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        state: BTreeMap<String, Value>,
    ) -> Result<SessionMeta> {
        let mut index = self.load_index(app_name, user_id)?;
        let key = session_key(app_name, user_id, session_id);
        let meta = index
            .get_mut(&key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        meta.state = state;
        meta.last_modified = Utc::now();
        let updated = meta.clone();
        self.save_index(app_name, user_id, &index)?;
        Ok(updated)
    }

    /// List sessions for a user, most recently modified first.
    pub fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionMeta>> {
        let index = self.load_index(app_name, user_id)?;
        let mut sessions: Vec<SessionMeta> = index.into_values().collect();
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(sessions)
    }

    pub fn delete(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()> {
        let path = self.session_path(app_name, user_id, session_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let mut index = self.load_index(app_name, user_id)?;
        index.remove(&session_key(app_name, user_id, session_id));
        self.save_index(app_name, user_id, &index)
    }

    /// Append one event atomically: open for append, write one JSON line,
    /// fsync before returning so a crash between events never leaves a
    /// half-written line visible to a subsequent reader.
    pub fn append_event(&self, app_name: &str, user_id: &str, session_id: &str, event: &Event) -> Result<()> {
        let path = self.session_path(app_name, user_id, session_id);
        if !path.exists() {
            return Err(SessionError::NotFound(session_key(app_name, user_id, session_id)));
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        let mut index = self.load_index(app_name, user_id)?;
        let key = session_key(app_name, user_id, session_id);
        if let Some(meta) = index.get_mut(&key) {
            meta.last_modified = Utc::now();
            self.save_index(app_name, user_id, &index)?;
        }
        Ok(())
    }

    /// Load every event for a session, in append order.
    pub fn load_events(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<Vec<Event>> {
        let path = self.session_path(app_name, user_id, session_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(session_key(app_name, user_id, session_id)))
            }
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| SessionError::StorageFailed(path.display().to_string()))?;
    let tmp_name = format!(
        ".{}.loom-tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("index"),
        std::process::id()
    );
    let tmp_path = dir.join(tmp_name);

    let result = (|| -> Result<()> {
        let mut f = File::create(&tmp_path)?;
        serde_json::to_writer(&mut f, value)?;
        f.sync_all()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
