//! Terminal UI-state broadcast: which terminal sessions exist and which is active.
//!
//! The server opens each connection with a full snapshot (no SSE id) and then
//! sends `state.replace` patches whose SSE id is the broadcast sequence. Every
//! state carries a `version`; a state older than the one already applied is a
//! replay from a superseded connection and is dropped.

use chrono::{DateTime, Utc};
use resync_protocol::{parse_ui_state_event, SseFrame, TerminalUiState, UiStateEvent};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::stream::{
    BackoffPolicy, CloseMode, ResumableStreamClient, StreamInput, StreamKey, StreamOutcome,
    StreamTransport,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "ui_state", rename_all = "snake_case")]
pub enum UiStateOutcome {
    Stream { outcome: StreamOutcome },
    Applied { version: u64, sessions_changed: bool },
    /// Version regressed; kept the current state.
    Outdated { version: u64, current: u64 },
    /// A patch with no full state in it.
    NoState,
}

#[derive(Debug, Clone)]
pub struct TerminalUiStateSync {
    client: ResumableStreamClient,
    state: Option<TerminalUiState>,
}

impl TerminalUiStateSync {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            client: ResumableStreamClient::new(StreamKey::UiState, backoff),
            state: None,
        }
    }

    pub fn client(&self) -> &ResumableStreamClient {
        &self.client
    }

    pub fn state(&self) -> Option<&TerminalUiState> {
        self.state.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.state.as_ref().map(|state| state.version).unwrap_or(0)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.state
            .as_ref()
            .map(|state| state.session_ids.clone())
            .unwrap_or_default()
    }

    pub fn connect<T: StreamTransport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &mut T) -> u64 {
        self.client.connect(now, None, transport)
    }

    pub fn close<T: StreamTransport + ?Sized>(&mut self, mode: CloseMode, transport: &mut T) -> bool {
        self.client.close(mode, transport)
    }

    pub fn force_reconnect<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<u64> {
        self.client.force_reconnect(now, transport)
    }

    pub fn poll<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<StreamOutcome> {
        self.client.poll(now, transport)
    }

    /// Decodes and applies one frame from the UI-state stream.
    pub fn handle_frame<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        frame: &SseFrame,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Result<UiStateOutcome> {
        if frame.is_heartbeat() {
            let outcome = self
                .client
                .handle(generation, StreamInput::Heartbeat, now, transport);
            return Ok(UiStateOutcome::Stream { outcome });
        }

        let event = parse_ui_state_event(&frame.data).map_err(|info| {
            warn!(code = %info.code, "Malformed UI-state frame");
            SyncError::InvalidFrame {
                stream: StreamKey::UiState.to_string(),
                info,
            }
        })?;

        let seq = frame.seq().or_else(|| event.seq());
        match self
            .client
            .handle(generation, StreamInput::Data { seq }, now, transport)
        {
            StreamOutcome::Data { .. } => Ok(self.apply_event(&event)),
            outcome => Ok(UiStateOutcome::Stream { outcome }),
        }
    }

    pub fn on_transport_error<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        error: impl Into<String>,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> StreamOutcome {
        self.client.handle(
            generation,
            StreamInput::TransportError(error.into()),
            now,
            transport,
        )
    }

    /// Applies an event delivered through any stream (the global stream also relays these).
    pub fn apply_event(&mut self, event: &UiStateEvent) -> UiStateOutcome {
        match event.latest_state() {
            Some(state) => self.apply(state.clone()),
            None => UiStateOutcome::NoState,
        }
    }

    fn apply(&mut self, next: TerminalUiState) -> UiStateOutcome {
        let current = self.version();
        if self.state.is_some() && next.version < current {
            debug!(
                version = next.version,
                current, "Ignoring outdated terminal UI state"
            );
            return UiStateOutcome::Outdated {
                version: next.version,
                current,
            };
        }

        let sessions_changed = self
            .state
            .as_ref()
            .map(|state| state.session_ids != next.session_ids)
            .unwrap_or(true);
        let version = next.version;
        self.state = Some(next);
        UiStateOutcome::Applied {
            version,
            sessions_changed,
        }
    }
}
