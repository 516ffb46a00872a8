//! N independent terminal output streams keyed by session id.
//!
//! A tracked session owns exactly one [`TerminalSlot`]: its stream client
//! (cursor, generation, attempts, manual flag, timers) and its output buffer.
//! Keeping everything in one entry means `remove` cannot leave half a session
//! behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use resync_protocol::TerminalStreamEvent;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::TerminalConfig;
use crate::error::{Result, SyncError};
use crate::liveness::LivenessWatchdog;
use crate::stream::{
    BackoffPolicy, CloseMode, ExitInfo, GapMarker, ProbeResult, ResumableStreamClient,
    StreamInput, StreamKey, StreamOutcome, StreamState, StreamStatus, StreamTransport,
};

use super::buffer::OutputBuffer;

#[derive(Debug, Clone)]
pub struct TerminalSlot {
    client: ResumableStreamClient,
    buffer: OutputBuffer,
}

impl TerminalSlot {
    pub fn state(&self) -> &StreamState {
        self.client.state()
    }

    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// No tracked session with that id; the callback was dropped.
    Untracked,
    Stream { outcome: StreamOutcome },
    Output { seq: u64, appended: bool },
    /// Server history no longer covers our cursor; the buffer was cleared.
    HistoryReset { gap: GapMarker },
    Exited { info: ExitInfo },
    /// The session was removed along with all of its local state.
    Removed,
}

/// Read-only view of one session for UI consumers and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalSummary {
    pub session_id: String,
    pub status: StreamStatus,
    pub cursor: u64,
    pub generation: u64,
    pub reconnect_attempts: u32,
    pub manually_disconnected: bool,
    pub buffered_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct TerminalStreamManager {
    slots: BTreeMap<String, TerminalSlot>,
    backoff: BackoffPolicy,
    probe_before_retry: bool,
    buffer_max_bytes: usize,
}

impl TerminalStreamManager {
    pub fn new(config: &TerminalConfig, backoff: BackoffPolicy) -> Self {
        Self {
            slots: BTreeMap::new(),
            backoff,
            probe_before_retry: config.probe_before_retry,
            buffer_max_bytes: config.output_buffer_max_bytes,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tracking
    // ─────────────────────────────────────────────────────────────────────

    /// Starts tracking `session_id`. Returns false if it was already tracked.
    pub fn track(&mut self, session_id: &str) -> bool {
        if self.slots.contains_key(session_id) {
            return false;
        }
        let client = ResumableStreamClient::new(
            StreamKey::Terminal(session_id.to_string()),
            self.backoff,
        )
        .with_probe(self.probe_before_retry);
        self.slots.insert(
            session_id.to_string(),
            TerminalSlot {
                client,
                buffer: OutputBuffer::new(self.buffer_max_bytes),
            },
        );
        debug!(session_id = %session_id, "Tracking terminal session");
        true
    }

    /// Replaces the tracked set. Sessions no longer listed are removed.
    /// Returns the removed ids.
    pub fn set_tracked<I, S, T>(&mut self, session_ids: I, transport: &mut T) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        T: StreamTransport + ?Sized,
    {
        let wanted: Vec<String> = session_ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        let stale: Vec<String> = self
            .slots
            .keys()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        for id in &stale {
            self.remove(id, transport);
        }
        for id in &wanted {
            self.track(id);
        }
        stale
    }

    /// Opens a stream for every tracked session that should have one and doesn't.
    ///
    /// Skips manually disconnected and exited sessions. Returns the sessions
    /// opened, with their new generation.
    pub fn ensure_all_tracked<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<(String, u64)> {
        let mut opened = Vec::new();
        for (id, slot) in self.slots.iter_mut() {
            let client = &mut slot.client;
            if client.is_manually_disconnected()
                || client.status() == StreamStatus::Exited
                || client.is_open()
            {
                continue;
            }
            let generation = client.connect(now, None, transport);
            opened.push((id.clone(), generation));
        }
        opened
    }

    /// Removes a session and every piece of local state it owns.
    pub fn remove<T: StreamTransport + ?Sized>(&mut self, session_id: &str, transport: &mut T) -> bool {
        let Some(mut slot) = self.slots.remove(session_id) else {
            return false;
        };
        slot.client.close(CloseMode::Manual, transport);
        info!(
            session_id = %session_id,
            cursor = slot.client.cursor(),
            buffered_bytes = slot.buffer.bytes(),
            "Terminal session removed"
        );
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Explicit connect / disconnect
    // ─────────────────────────────────────────────────────────────────────

    /// User-requested connect. Tracks the session if needed and clears its
    /// manual-disconnect flag.
    pub fn connect<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> u64 {
        self.track(session_id);
        self.slots
            .get_mut(session_id)
            .map(|slot| slot.client.connect(now, None, transport))
            .unwrap_or_default()
    }

    pub fn disconnect<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        transport: &mut T,
    ) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(session_id)
            .ok_or_else(|| SyncError::UnknownStream(format!("terminal:{}", session_id)))?;
        Ok(slot.client.close(CloseMode::Manual, transport))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport callbacks
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        event: TerminalStreamEvent,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> TerminalOutcome {
        let Some(slot) = self.slots.get_mut(session_id) else {
            debug!(session_id = %session_id, "Dropping frame for untracked session");
            return TerminalOutcome::Untracked;
        };

        match event {
            TerminalStreamEvent::Connected { .. } => TerminalOutcome::Stream {
                outcome: slot
                    .client
                    .handle(generation, StreamInput::Connected, now, transport),
            },
            TerminalStreamEvent::Data { seq, data } => {
                let outcome = slot.client.handle(
                    generation,
                    StreamInput::Data { seq: Some(seq) },
                    now,
                    transport,
                );
                match outcome {
                    StreamOutcome::Data { .. } => TerminalOutcome::Output {
                        seq,
                        appended: slot.buffer.push(seq, &data),
                    },
                    other => TerminalOutcome::Stream { outcome: other },
                }
            }
            TerminalStreamEvent::Resync {
                reason,
                since,
                first_available_seq,
                last_seq,
            }
            | TerminalStreamEvent::ReplayGap {
                reason,
                since,
                first_available_seq,
                last_seq,
            } => {
                let marker = GapMarker {
                    reason,
                    since,
                    first_available_seq,
                    last_seq,
                };
                match slot
                    .client
                    .handle(generation, StreamInput::Gap(marker), now, transport)
                {
                    StreamOutcome::Gap(gap) => {
                        slot.buffer.reset();
                        TerminalOutcome::HistoryReset { gap }
                    }
                    other => TerminalOutcome::Stream { outcome: other },
                }
            }
            TerminalStreamEvent::Exit { exit_code, signal } => {
                let info = ExitInfo { exit_code, signal };
                match slot
                    .client
                    .handle(generation, StreamInput::Exit(info), now, transport)
                {
                    StreamOutcome::Exited(info) => TerminalOutcome::Exited { info },
                    other => TerminalOutcome::Stream { outcome: other },
                }
            }
            // Unrecognized frames still prove the connection is alive.
            TerminalStreamEvent::Unknown => TerminalOutcome::Stream {
                outcome: slot
                    .client
                    .handle(generation, StreamInput::Heartbeat, now, transport),
            },
        }
    }

    pub fn on_heartbeat<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> TerminalOutcome {
        self.stream_input(session_id, generation, StreamInput::Heartbeat, now, transport)
    }

    pub fn on_transport_error<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        error: impl Into<String>,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> TerminalOutcome {
        self.stream_input(
            session_id,
            generation,
            StreamInput::TransportError(error.into()),
            now,
            transport,
        )
    }

    /// Existence-probe answer. A negative answer removes the session.
    pub fn probe_completed<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        result: ProbeResult,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> TerminalOutcome {
        let Some(slot) = self.slots.get_mut(session_id) else {
            return TerminalOutcome::Untracked;
        };
        match slot.client.probe_completed(generation, result, now, transport) {
            StreamOutcome::Gone => {
                self.remove(session_id, transport);
                TerminalOutcome::Removed
            }
            outcome => TerminalOutcome::Stream { outcome },
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timers and lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.slots
            .values()
            .filter_map(|slot| slot.client.next_deadline())
            .min()
    }

    /// Fires every due reconnect timer.
    pub fn poll_timers<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<(String, StreamOutcome)> {
        self.slots
            .iter_mut()
            .filter_map(|(id, slot)| {
                slot.client
                    .poll(now, transport)
                    .map(|outcome| (id.clone(), outcome))
            })
            .collect()
    }

    /// Closes every stream without setting the manual flag (pagehide/freeze).
    pub fn suspend_all<T: StreamTransport + ?Sized>(&mut self, transport: &mut T) -> usize {
        let mut closed = 0;
        for slot in self.slots.values_mut() {
            if slot.client.close(CloseMode::Suspend, transport) {
                closed += 1;
            }
        }
        closed
    }

    /// Replaces every eligible stream's connection, resuming from its cursor.
    pub fn force_reconnect_all<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<(String, u64)> {
        self.slots
            .iter_mut()
            .filter_map(|(id, slot)| {
                slot.client
                    .force_reconnect(now, transport)
                    .map(|generation| (id.clone(), generation))
            })
            .collect()
    }

    pub fn force_reconnect<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<u64> {
        self.slots
            .get_mut(session_id)?
            .client
            .force_reconnect(now, transport)
    }

    /// Sessions whose visible, connected stream has gone silent too long.
    pub fn stalled(&self, now: DateTime<Utc>, watchdog: &LivenessWatchdog, visible: bool) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| {
                watchdog.is_stalled(slot.client.status(), slot.client.chunk_age_ms(now), visible)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Oldest chunk age across connected sessions.
    pub fn max_chunk_age_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        self.slots
            .values()
            .filter(|slot| slot.client.status() == StreamStatus::Connected)
            .filter_map(|slot| slot.client.chunk_age_ms(now))
            .max()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Snapshot reads
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_tracked(&self, session_id: &str) -> bool {
        self.slots.contains_key(session_id)
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, session_id: &str) -> Option<&TerminalSlot> {
        self.slots.get(session_id)
    }

    pub fn status(&self, session_id: &str) -> Option<StreamStatus> {
        self.slots.get(session_id).map(|slot| slot.client.status())
    }

    pub fn generation(&self, session_id: &str) -> Option<u64> {
        self.slots
            .get(session_id)
            .map(|slot| slot.client.generation())
    }

    /// Buffered output for instant repaint.
    pub fn snapshot(&self, session_id: &str) -> Option<String> {
        self.slots.get(session_id).map(|slot| slot.buffer.snapshot())
    }

    pub fn summaries(&self) -> Vec<TerminalSummary> {
        self.slots
            .iter()
            .map(|(id, slot)| {
                let state = slot.client.state();
                TerminalSummary {
                    session_id: id.clone(),
                    status: state.status,
                    cursor: state.cursor,
                    generation: state.generation,
                    reconnect_attempts: state.reconnect_attempts,
                    manually_disconnected: state.manually_disconnected,
                    buffered_bytes: slot.buffer.bytes(),
                }
            })
            .collect()
    }

    fn stream_input<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        input: StreamInput,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> TerminalOutcome {
        match self.slots.get_mut(session_id) {
            Some(slot) => TerminalOutcome::Stream {
                outcome: slot.client.handle(generation, input, now, transport),
            },
            None => TerminalOutcome::Untracked,
        }
    }
}
