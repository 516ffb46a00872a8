//! Optimistic echo for locally sent chat messages.
//!
//! A send shows a placeholder immediately. The placeholder is retired once the
//! authoritative message list contains a user message that plausibly is the
//! echo of it: newer than the baseline captured at send time, below any active
//! revert boundary, with visible content, similar text, and at least as many
//! attachments.
//!
//! Message ids are sortable strings; "newer" means lexicographically greater.
//! Text similarity is normalize + substring in either direction, which can
//! match two unrelated messages when one is a prefix of the other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file_count: usize,
}

impl AuthoritativeMessage {
    /// Metadata-only updates have no visible parts yet.
    pub fn has_visible_content(&self) -> bool {
        !self.text.trim().is_empty() || self.file_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisticStatus {
    Sending,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimisticEntry {
    pub key: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub status: OptimisticStatus,
    pub text: String,
    pub files: Vec<String>,
    pub baseline_message_id: Option<String>,
    /// Begun while the global stream was down; released by `flush_on_connected`.
    pub awaiting_connection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum AckOutcome {
    NoEntry,
    Pending,
    Acknowledged { key: String, message_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct OptimisticEchoReconciler {
    entries: HashMap<String, OptimisticEntry>,
    revert_boundaries: HashMap<String, String>,
}

impl OptimisticEchoReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, session_id: &str) -> Option<&OptimisticEntry> {
        self.entries.get(session_id)
    }

    /// Every live entry, ordered by session id.
    pub fn entries(&self) -> Vec<OptimisticEntry> {
        let mut entries: Vec<OptimisticEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets (or clears) the id a conversation was reverted to. Messages at or
    /// above it are hidden and never count as an echo.
    pub fn set_revert_boundary(&mut self, session_id: &str, boundary: Option<String>) {
        match boundary {
            Some(id) => {
                self.revert_boundaries.insert(session_id.to_string(), id);
            }
            None => {
                self.revert_boundaries.remove(session_id);
            }
        }
    }

    /// Starts a send. Replaces any entry already live for the session.
    pub fn begin(
        &mut self,
        session_id: &str,
        text: &str,
        files: Vec<String>,
        messages: &[AuthoritativeMessage],
        now: DateTime<Utc>,
        connected: bool,
    ) -> &OptimisticEntry {
        let boundary = self.revert_boundaries.get(session_id);
        let baseline_message_id = messages
            .iter()
            .filter(|message| boundary.map(|b| message.id < *b).unwrap_or(true))
            .map(|message| message.id.as_str())
            .max()
            .map(str::to_string);

        let entry = OptimisticEntry {
            key: make_entry_key(now),
            session_id: session_id.to_string(),
            created_at: now,
            status: OptimisticStatus::Sending,
            text: text.to_string(),
            files,
            baseline_message_id,
            awaiting_connection: !connected,
        };
        debug!(
            session_id = %session_id,
            key = %entry.key,
            baseline = ?entry.baseline_message_id,
            awaiting_connection = entry.awaiting_connection,
            "Optimistic send started"
        );
        self.entries.insert(session_id.to_string(), entry);
        &self.entries[session_id]
    }

    pub fn mark_sent(&mut self, session_id: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(session_id)
            .ok_or_else(|| SyncError::NoPendingSend {
                session_id: session_id.to_string(),
            })?;
        entry.status = OptimisticStatus::Sent;
        Ok(())
    }

    /// Runs the acknowledgement test against the latest authoritative list.
    pub fn observe(&mut self, session_id: &str, messages: &[AuthoritativeMessage]) -> AckOutcome {
        let Some(entry) = self.entries.get(session_id) else {
            return AckOutcome::NoEntry;
        };
        let boundary = self.revert_boundaries.get(session_id);

        let mut candidates: Vec<&AuthoritativeMessage> = messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .filter(|message| {
                entry
                    .baseline_message_id
                    .as_ref()
                    .map(|baseline| message.id > *baseline)
                    .unwrap_or(true)
            })
            .filter(|message| boundary.map(|b| message.id < *b).unwrap_or(true))
            .collect();
        candidates.sort_by(|a, b| b.id.cmp(&a.id));

        let Some(newest) = candidates
            .into_iter()
            .find(|message| message.has_visible_content())
        else {
            return AckOutcome::Pending;
        };

        if !texts_match(&entry.text, &newest.text) || newest.file_count < entry.files.len() {
            return AckOutcome::Pending;
        }

        let message_id = newest.id.clone();
        let key = entry.key.clone();
        self.entries.remove(session_id);
        info!(
            session_id = %session_id,
            key = %key,
            message_id = %message_id,
            "Optimistic send acknowledged"
        );
        AckOutcome::Acknowledged { key, message_id }
    }

    /// Discards the entry after a failed send and hands it back so the caller
    /// can restore the draft. No retry is attempted.
    pub fn clear_on_failure(&mut self, session_id: &str) -> Option<OptimisticEntry> {
        let entry = self.entries.remove(session_id)?;
        info!(session_id = %session_id, key = %entry.key, "Optimistic send failed; discarded");
        Some(entry)
    }

    /// Retires every entry that doesn't belong to the newly active session.
    pub fn switch_session(&mut self, session_id: &str) -> Vec<OptimisticEntry> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| id.as_str() != session_id)
            .cloned()
            .collect();
        stale
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    /// Releases entries that were waiting for the stream to come back.
    pub fn flush_on_connected(&mut self) -> Vec<OptimisticEntry> {
        let mut released: Vec<OptimisticEntry> = self
            .entries
            .values_mut()
            .filter(|entry| entry.awaiting_connection)
            .map(|entry| {
                entry.awaiting_connection = false;
                entry.clone()
            })
            .collect();
        released.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        released
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn texts_match(optimistic: &str, authoritative: &str) -> bool {
    let a = normalize(optimistic);
    let b = normalize(authoritative);
    a.contains(&b) || b.contains(&a)
}

fn make_entry_key(now: DateTime<Utc>) -> String {
    let mut random = rand::thread_rng();
    format!("opt-{}-{:x}", now.timestamp_millis(), random.next_u64())
}
