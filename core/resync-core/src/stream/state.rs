//! Per-stream bookkeeping owned by exactly one `ResumableStreamClient`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StreamKey {
    /// The single account-wide event stream.
    Global,
    /// Output stream of one terminal session.
    Terminal(String),
    /// Terminal UI-state broadcast.
    UiState,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::Global => write!(f, "global"),
            StreamKey::Terminal(id) => write!(f, "terminal:{}", id),
            StreamKey::UiState => write!(f, "ui-state"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Exited,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Disconnected => "disconnected",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Connected => "connected",
            StreamStatus::Reconnecting => "reconnecting",
            StreamStatus::Error => "error",
            StreamStatus::Exited => "exited",
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, StreamStatus::Connecting | StreamStatus::Reconnecting)
    }
}

/// Server signal that the client's cursor is older than the replayable history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapMarker {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub first_available_seq: Option<u64>,
    #[serde(default)]
    pub last_seq: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamState {
    pub key: StreamKey,
    pub status: StreamStatus,
    /// Last acknowledged sequence. Zero means nothing was consumed yet.
    pub cursor: u64,
    pub generation: u64,
    pub reconnect_attempts: u32,
    pub manually_disconnected: bool,
    pub last_chunk_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_gap: Option<GapMarker>,
    pub last_gap_at: Option<DateTime<Utc>>,
}

impl StreamState {
    pub fn new(key: StreamKey) -> Self {
        Self {
            key,
            status: StreamStatus::Disconnected,
            cursor: 0,
            generation: 0,
            reconnect_attempts: 0,
            manually_disconnected: false,
            last_chunk_at: None,
            connected_at: None,
            last_error: None,
            last_gap: None,
            last_gap_at: None,
        }
    }

    /// Moves the cursor forward to `seq`; never backwards. Returns whether it moved.
    pub fn advance_cursor(&mut self, seq: u64) -> bool {
        if seq > self.cursor {
            self.cursor = seq;
            true
        } else {
            false
        }
    }

    /// Replaces the cursor outright, backwards included. Only a server-side
    /// sequence reset justifies this.
    pub fn rebase_cursor(&mut self, seq: u64) {
        self.cursor = seq;
    }

    pub fn resume_cursor(&self) -> Option<u64> {
        (self.cursor > 0).then_some(self.cursor)
    }
}
