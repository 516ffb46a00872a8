//! Error types for resync-core operations.
//!
//! Transport drops, backoff, and stale callbacks never surface here: those are
//! absorbed into stream status. Only configuration, frame decoding, and API
//! misuse produce a `SyncError`.

use std::path::PathBuf;

use resync_protocol::ErrorInfo;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid frame on {stream}: {info}")]
    InvalidFrame { stream: String, info: ErrorInfo },

    // ─────────────────────────────────────────────────────────────────────
    // Stream Table Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    // ─────────────────────────────────────────────────────────────────────
    // Send Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No pending send for session {session_id}")]
    NoPendingSend { session_id: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<SyncError> for String {
    fn from(err: SyncError) -> String {
        err.to_string()
    }
}
