//! One resumable stream: connect, ingest, reconnect with backoff, resume from cursor.
//!
//! Every connection attempt bumps `generation`. Callbacks carry the generation
//! they were opened with, and anything that doesn't match the current one is
//! dropped before it can touch state. A transport error ends the connection
//! without a new generation, so callbacks are also dropped while nothing is
//! open. `close` is the only cancellation path: it clears the pending
//! reconnect timer and bumps the generation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{add_ms, elapsed_ms};

use super::backoff::BackoffPolicy;
use super::state::{ExitInfo, GapMarker, StreamKey, StreamState, StreamStatus};
use super::transport::{OpenRequest, StreamTransport};

/// A callback delivered by the transport for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInput {
    Connected,
    Data { seq: Option<u64> },
    Heartbeat,
    Gap(GapMarker),
    Exit(ExitInfo),
    TransportError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseMode {
    /// User/caller intent: blocks auto-reconnect until an explicit `connect`.
    Manual,
    /// The page is being frozen or hidden; the next resume reopens it.
    Suspend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Exists,
    Gone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StreamOutcome {
    /// The callback belonged to a superseded connection.
    Stale,
    /// Current generation, but the stream is in a state that ignores it.
    Ignored,
    Connected,
    Data { seq: Option<u64>, cursor_advanced: bool },
    Heartbeat,
    Gap(GapMarker),
    Exited(ExitInfo),
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    Probing { generation: u64 },
    Reopened { generation: u64 },
    /// The probe reported the remote resource no longer exists.
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectPhase {
    Waiting,
    Probing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingReconnect {
    due_at: DateTime<Utc>,
    generation: u64,
    phase: ReconnectPhase,
}

#[derive(Debug, Clone)]
pub struct ResumableStreamClient {
    state: StreamState,
    backoff: BackoffPolicy,
    probe_before_retry: bool,
    open_generation: Option<u64>,
    pending: Option<PendingReconnect>,
}

impl ResumableStreamClient {
    pub fn new(key: StreamKey, backoff: BackoffPolicy) -> Self {
        Self {
            state: StreamState::new(key),
            backoff,
            probe_before_retry: false,
            open_generation: None,
            pending: None,
        }
    }

    /// Enables the existence probe before every reconnect attempt past the first.
    pub fn with_probe(mut self, enabled: bool) -> Self {
        self.probe_before_retry = enabled;
        self
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn key(&self) -> &StreamKey {
        &self.state.key
    }

    pub fn status(&self) -> StreamStatus {
        self.state.status
    }

    pub fn cursor(&self) -> u64 {
        self.state.cursor
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn is_open(&self) -> bool {
        self.open_generation.is_some()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_manually_disconnected(&self) -> bool {
        self.state.manually_disconnected
    }

    /// When the host should call [`poll`](Self::poll) next.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending
            .filter(|pending| pending.phase == ReconnectPhase::Waiting)
            .map(|pending| pending.due_at)
    }

    pub fn chunk_age_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        self.state.last_chunk_at.map(|at| elapsed_ms(now, at))
    }

    /// Moves the cursor to `seq` after the server reset its sequence.
    ///
    /// Only the open connection of the current generation may do this.
    pub fn rebase_cursor(&mut self, generation: u64, seq: u64) -> bool {
        if generation != self.state.generation || self.open_generation != Some(generation) {
            return false;
        }
        info!(
            stream = %self.state.key,
            from = self.state.cursor,
            to = seq,
            "Cursor rebased after server sequence reset"
        );
        self.state.rebase_cursor(seq);
        true
    }

    /// Explicit connect request. Clears the manual-disconnect flag.
    ///
    /// A stream that is already open (or opening) keeps its connection and
    /// returns the current generation.
    pub fn connect<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        resume_from: Option<u64>,
        transport: &mut T,
    ) -> u64 {
        self.state.manually_disconnected = false;
        if let Some(cursor) = resume_from {
            self.state.advance_cursor(cursor);
        }
        if self.is_open() && self.state.status != StreamStatus::Exited {
            return self.state.generation;
        }
        self.pending = None;
        self.open(now, transport)
    }

    /// Replaces the current connection even if it looks healthy.
    ///
    /// Returns `None` when the stream must stay closed (manual disconnect or exited).
    pub fn force_reconnect<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<u64> {
        if self.state.manually_disconnected || self.state.status == StreamStatus::Exited {
            return None;
        }
        self.pending = None;
        Some(self.open(now, transport))
    }

    /// Closes the stream. Idempotent: a second manual close changes nothing.
    pub fn close<T: StreamTransport + ?Sized>(&mut self, mode: CloseMode, transport: &mut T) -> bool {
        let already_closed = !self.is_open()
            && self.pending.is_none()
            && matches!(
                self.state.status,
                StreamStatus::Disconnected | StreamStatus::Exited
            );
        let manual = mode == CloseMode::Manual;
        if already_closed && (!manual || self.state.manually_disconnected) {
            return false;
        }

        if manual {
            self.state.manually_disconnected = true;
            self.state.reconnect_attempts = 0;
        }
        self.pending = None;
        if let Some(generation) = self.open_generation.take() {
            transport.close(&self.state.key, generation);
        }
        self.state.generation += 1;
        if self.state.status != StreamStatus::Exited {
            self.state.status = StreamStatus::Disconnected;
        }
        debug!(
            stream = %self.state.key,
            mode = ?mode,
            generation = self.state.generation,
            "Stream closed"
        );
        true
    }

    /// Applies one transport callback tagged with the generation it was opened with.
    pub fn handle<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        input: StreamInput,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> StreamOutcome {
        if generation != self.state.generation {
            debug!(
                stream = %self.state.key,
                callback_generation = generation,
                current_generation = self.state.generation,
                "Dropping callback from superseded connection"
            );
            return StreamOutcome::Stale;
        }
        if self.state.status == StreamStatus::Exited {
            return StreamOutcome::Ignored;
        }
        if self.open_generation != Some(generation) {
            debug!(
                stream = %self.state.key,
                callback_generation = generation,
                "Dropping callback for a connection that already ended"
            );
            return StreamOutcome::Stale;
        }

        match input {
            StreamInput::Connected => {
                self.mark_connected(now);
                StreamOutcome::Connected
            }
            StreamInput::Heartbeat => {
                self.state.last_chunk_at = Some(now);
                StreamOutcome::Heartbeat
            }
            StreamInput::Data { seq } => {
                if self.state.status.is_opening() {
                    self.mark_connected(now);
                }
                self.state.last_chunk_at = Some(now);
                let cursor_advanced = seq
                    .map(|seq| self.state.advance_cursor(seq))
                    .unwrap_or(false);
                StreamOutcome::Data {
                    seq,
                    cursor_advanced,
                }
            }
            StreamInput::Gap(marker) => {
                info!(
                    stream = %self.state.key,
                    cursor = self.state.cursor,
                    first_available_seq = ?marker.first_available_seq,
                    reason = ?marker.reason,
                    "Stream history gap"
                );
                self.state.last_chunk_at = Some(now);
                self.state.last_gap = Some(marker.clone());
                self.state.last_gap_at = Some(now);
                StreamOutcome::Gap(marker)
            }
            StreamInput::Exit(info) => {
                info!(
                    stream = %self.state.key,
                    exit_code = ?info.exit_code,
                    signal = ?info.signal,
                    "Stream exited"
                );
                self.pending = None;
                if let Some(open) = self.open_generation.take() {
                    transport.close(&self.state.key, open);
                }
                self.state.status = StreamStatus::Exited;
                StreamOutcome::Exited(info)
            }
            StreamInput::TransportError(error) => {
                if let Some(open) = self.open_generation.take() {
                    transport.close(&self.state.key, open);
                }
                self.state.last_error = Some(error.clone());
                debug!(stream = %self.state.key, error = %error, "Stream transport error");
                self.schedule_reconnect(now)
            }
        }
    }

    /// Fires the reconnect timer when due.
    pub fn poll<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<StreamOutcome> {
        let pending = self.pending?;
        if pending.phase != ReconnectPhase::Waiting || now < pending.due_at {
            return None;
        }
        if pending.generation != self.state.generation {
            self.pending = None;
            return None;
        }

        if self.probe_before_retry && self.state.reconnect_attempts > 1 {
            self.pending = Some(PendingReconnect {
                phase: ReconnectPhase::Probing,
                ..pending
            });
            transport.probe(&self.state.key, self.state.generation);
            debug!(
                stream = %self.state.key,
                attempt = self.state.reconnect_attempts,
                "Probing resource before reconnect"
            );
            return Some(StreamOutcome::Probing {
                generation: self.state.generation,
            });
        }

        self.pending = None;
        let generation = self.open(now, transport);
        Some(StreamOutcome::Reopened { generation })
    }

    /// Result of a probe issued by [`poll`](Self::poll).
    pub fn probe_completed<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        result: ProbeResult,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> StreamOutcome {
        let awaiting = matches!(
            self.pending,
            Some(PendingReconnect {
                phase: ReconnectPhase::Probing,
                generation: pending_generation,
                ..
            }) if pending_generation == generation
        );
        if !awaiting || generation != self.state.generation {
            return StreamOutcome::Stale;
        }

        self.pending = None;
        match result {
            ProbeResult::Exists => {
                let generation = self.open(now, transport);
                StreamOutcome::Reopened { generation }
            }
            ProbeResult::Gone => {
                info!(stream = %self.state.key, "Remote resource gone; not reconnecting");
                self.state.status = StreamStatus::Disconnected;
                StreamOutcome::Gone
            }
            ProbeResult::Failed(error) => {
                self.state.last_error = Some(error);
                let outcome = self.schedule_reconnect(now);
                self.state.status = StreamStatus::Error;
                outcome
            }
        }
    }

    fn mark_connected(&mut self, now: DateTime<Utc>) {
        if self.state.reconnect_attempts > 0 {
            info!(
                stream = %self.state.key,
                attempts = self.state.reconnect_attempts,
                cursor = self.state.cursor,
                "Stream reconnected"
            );
        }
        self.state.reconnect_attempts = 0;
        self.state.status = StreamStatus::Connected;
        self.state.connected_at = Some(now);
        self.state.last_chunk_at = Some(now);
        self.state.last_error = None;
    }

    fn schedule_reconnect(&mut self, now: DateTime<Utc>) -> StreamOutcome {
        if let Some(pending) = self.pending {
            // Already armed; a second error must not stack another timer.
            return StreamOutcome::ReconnectScheduled {
                attempt: self.state.reconnect_attempts,
                delay_ms: elapsed_ms(pending.due_at, now),
            };
        }

        let delay_ms = self.backoff.delay_ms(self.state.reconnect_attempts);
        self.state.reconnect_attempts = self.backoff.next_attempt(self.state.reconnect_attempts);
        self.state.status = StreamStatus::Reconnecting;
        self.pending = Some(PendingReconnect {
            due_at: add_ms(now, delay_ms),
            generation: self.state.generation,
            phase: ReconnectPhase::Waiting,
        });
        debug!(
            stream = %self.state.key,
            attempt = self.state.reconnect_attempts,
            delay_ms,
            "Reconnect scheduled"
        );
        StreamOutcome::ReconnectScheduled {
            attempt: self.state.reconnect_attempts,
            delay_ms,
        }
    }

    fn open<T: StreamTransport + ?Sized>(&mut self, now: DateTime<Utc>, transport: &mut T) -> u64 {
        if let Some(previous) = self.open_generation.take() {
            transport.close(&self.state.key, previous);
        }
        self.state.generation += 1;
        self.state.status = if self.state.reconnect_attempts > 0 {
            StreamStatus::Reconnecting
        } else {
            StreamStatus::Connecting
        };
        // Reset liveness so a fresh attempt is not judged by the old connection's silence.
        self.state.last_chunk_at = Some(now);
        let request = OpenRequest {
            key: self.state.key.clone(),
            generation: self.state.generation,
            resume_from: self.state.resume_cursor(),
        };
        debug!(
            stream = %self.state.key,
            generation = request.generation,
            resume_from = ?request.resume_from,
            "Opening stream"
        );
        transport.open(request);
        self.open_generation = Some(self.state.generation);
        self.state.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::{RecordingTransport, TransportCall};
    use chrono::Duration;

    fn client() -> ResumableStreamClient {
        ResumableStreamClient::new(StreamKey::Terminal("t1".into()), BackoffPolicy::default())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn connect_opens_with_resume_cursor() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), Some(12), &mut transport);
        assert_eq!(generation, 1);
        assert_eq!(client.status(), StreamStatus::Connecting);
        assert_eq!(transport.opens()[0].resume_from, Some(12));
    }

    #[test]
    fn connect_while_open_is_a_no_op() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let first = client.connect(t0(), None, &mut transport);
        let second = client.connect(t0(), None, &mut transport);
        assert_eq!(first, second);
        assert_eq!(transport.opens().len(), 1);
    }

    #[test]
    fn reconnect_scenario_resumes_from_cursor() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        client.handle(generation, StreamInput::Connected, t0(), &mut transport);
        client.handle(generation, StreamInput::Data { seq: Some(40) }, t0(), &mut transport);
        assert_eq!(client.cursor(), 40);

        let outcome = client.handle(
            generation,
            StreamInput::TransportError("network".into()),
            t0(),
            &mut transport,
        );
        assert_eq!(
            outcome,
            StreamOutcome::ReconnectScheduled {
                attempt: 1,
                delay_ms: 600
            }
        );
        assert_eq!(client.status(), StreamStatus::Reconnecting);
        assert_eq!(client.next_deadline(), Some(t0() + Duration::milliseconds(600)));

        assert!(client.poll(t0() + Duration::milliseconds(599), &mut transport).is_none());
        let reopened = client
            .poll(t0() + Duration::milliseconds(600), &mut transport)
            .unwrap();
        let StreamOutcome::Reopened { generation: next } = reopened else {
            panic!("expected reopen, got {:?}", reopened);
        };
        assert_eq!(
            transport.last_open_for(client.key()).unwrap().resume_from,
            Some(40)
        );
        assert_eq!(client.status(), StreamStatus::Reconnecting);

        client.handle(next, StreamInput::Data { seq: Some(41) }, t0(), &mut transport);
        assert_eq!(client.cursor(), 41);
        assert_eq!(client.status(), StreamStatus::Connected);
        assert_eq!(client.state().reconnect_attempts, 0);
    }

    #[test]
    fn stale_generation_is_ignored_after_close_and_reconnect() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let old = client.connect(t0(), None, &mut transport);
        client.handle(old, StreamInput::Data { seq: Some(5) }, t0(), &mut transport);
        client.close(CloseMode::Manual, &mut transport);
        let current = client.connect(t0(), None, &mut transport);
        assert_ne!(old, current);

        let before = client.state().clone();
        for input in [
            StreamInput::Connected,
            StreamInput::Data { seq: Some(99) },
            StreamInput::TransportError("late".into()),
            StreamInput::Exit(ExitInfo::default()),
        ] {
            assert_eq!(
                client.handle(old, input, t0(), &mut transport),
                StreamOutcome::Stale
            );
        }
        assert_eq!(client.state(), &before);
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn manual_close_is_idempotent() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        client.handle(
            generation,
            StreamInput::TransportError("drop".into()),
            t0(),
            &mut transport,
        );
        assert!(client.has_pending_reconnect());

        assert!(client.close(CloseMode::Manual, &mut transport));
        let after_first = client.state().clone();
        let calls_after_first = transport.calls().len();

        assert!(!client.close(CloseMode::Manual, &mut transport));
        assert_eq!(client.state(), &after_first);
        assert_eq!(transport.calls().len(), calls_after_first);
        assert_eq!(client.status(), StreamStatus::Disconnected);
        assert!(!client.has_pending_reconnect());
        assert!(client.next_deadline().is_none());
    }

    #[test]
    fn error_after_manual_close_is_dropped() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        client.connect(t0(), None, &mut transport);
        client.close(CloseMode::Manual, &mut transport);
        let generation = client.generation();
        let outcome = client.handle(
            generation,
            StreamInput::TransportError("closed".into()),
            t0(),
            &mut transport,
        );
        assert_eq!(outcome, StreamOutcome::Stale);
        assert_eq!(client.status(), StreamStatus::Disconnected);
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn repeated_errors_do_not_stack_timers() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        client.handle(generation, StreamInput::TransportError("a".into()), t0(), &mut transport);
        client.handle(generation, StreamInput::TransportError("b".into()), t0(), &mut transport);
        assert_eq!(client.state().reconnect_attempts, 1);
    }

    #[test]
    fn callbacks_after_transport_error_do_not_revive_the_stream() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        client.handle(generation, StreamInput::Connected, t0(), &mut transport);
        client.handle(
            generation,
            StreamInput::TransportError("reset".into()),
            t0(),
            &mut transport,
        );
        let before = client.state().clone();

        for input in [
            StreamInput::Data { seq: Some(3) },
            StreamInput::Connected,
            StreamInput::Heartbeat,
        ] {
            assert_eq!(
                client.handle(generation, input, t0(), &mut transport),
                StreamOutcome::Stale
            );
        }
        assert_eq!(client.state(), &before);
        assert_eq!(client.status(), StreamStatus::Reconnecting);
        assert_eq!(client.state().reconnect_attempts, 1);
        assert!(!client.is_open());
        assert!(client.has_pending_reconnect());
    }

    #[test]
    fn exit_stops_reconnects() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        let outcome = client.handle(
            generation,
            StreamInput::Exit(ExitInfo {
                exit_code: Some(0),
                signal: None,
            }),
            t0(),
            &mut transport,
        );
        assert!(matches!(outcome, StreamOutcome::Exited(_)));
        assert_eq!(client.status(), StreamStatus::Exited);

        let trailing = client.handle(
            generation,
            StreamInput::TransportError("eof".into()),
            t0(),
            &mut transport,
        );
        assert_eq!(trailing, StreamOutcome::Ignored);
        assert!(!client.has_pending_reconnect());
        assert!(client.force_reconnect(t0(), &mut transport).is_none());
    }

    #[test]
    fn gap_does_not_reconnect() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let generation = client.connect(t0(), None, &mut transport);
        let opens = transport.opens().len();
        let outcome = client.handle(
            generation,
            StreamInput::Gap(GapMarker {
                first_available_seq: Some(100),
                ..GapMarker::default()
            }),
            t0(),
            &mut transport,
        );
        assert!(matches!(outcome, StreamOutcome::Gap(_)));
        assert_eq!(transport.opens().len(), opens);
        assert!(client.state().last_gap.is_some());
    }

    #[test]
    fn probe_runs_only_after_first_retry() {
        let mut transport = RecordingTransport::new();
        let mut client = client().with_probe(true);
        let mut now = t0();
        let generation = client.connect(now, None, &mut transport);
        client.handle(generation, StreamInput::TransportError("x".into()), now, &mut transport);

        now += Duration::milliseconds(600);
        let first = client.poll(now, &mut transport).unwrap();
        let StreamOutcome::Reopened { generation } = first else {
            panic!("first retry should reopen without probing");
        };

        client.handle(generation, StreamInput::TransportError("y".into()), now, &mut transport);
        now += Duration::milliseconds(1_200);
        let second = client.poll(now, &mut transport).unwrap();
        assert_eq!(second, StreamOutcome::Probing { generation });
        assert!(matches!(
            transport.calls().last(),
            Some(TransportCall::Probe { .. })
        ));
        assert!(client.next_deadline().is_none());

        let gone = client.probe_completed(generation, ProbeResult::Gone, now, &mut transport);
        assert_eq!(gone, StreamOutcome::Gone);
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn failed_probe_reschedules_with_error_status() {
        let mut transport = RecordingTransport::new();
        let mut client = client().with_probe(true);
        let mut now = t0();
        let generation = client.connect(now, None, &mut transport);
        client.handle(generation, StreamInput::TransportError("x".into()), now, &mut transport);
        now += Duration::milliseconds(600);
        client.poll(now, &mut transport);
        let generation = client.generation();
        client.handle(generation, StreamInput::TransportError("y".into()), now, &mut transport);
        now += Duration::milliseconds(1_200);
        client.poll(now, &mut transport);

        let outcome = client.probe_completed(
            generation,
            ProbeResult::Failed("timeout".into()),
            now,
            &mut transport,
        );
        assert_eq!(
            outcome,
            StreamOutcome::ReconnectScheduled {
                attempt: 3,
                delay_ms: 2_400
            }
        );
        assert_eq!(client.status(), StreamStatus::Error);
    }

    #[test]
    fn late_probe_after_close_is_stale() {
        let mut transport = RecordingTransport::new();
        let mut client = client().with_probe(true);
        assert_eq!(
            client.probe_completed(0, ProbeResult::Exists, t0(), &mut transport),
            StreamOutcome::Stale
        );
    }

    #[test]
    fn rebase_requires_the_open_generation() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        let old = client.connect(t0(), None, &mut transport);
        client.handle(old, StreamInput::Data { seq: Some(500) }, t0(), &mut transport);
        client.close(CloseMode::Suspend, &mut transport);
        assert!(!client.rebase_cursor(old, 20));
        assert_eq!(client.cursor(), 500);

        let current = client.connect(t0(), None, &mut transport);
        assert!(client.rebase_cursor(current, 20));
        assert_eq!(client.cursor(), 20);
    }

    #[test]
    fn suspend_keeps_manual_flag_clear() {
        let mut transport = RecordingTransport::new();
        let mut client = client();
        client.connect(t0(), None, &mut transport);
        client.close(CloseMode::Suspend, &mut transport);
        assert!(!client.is_manually_disconnected());
        assert!(client.force_reconnect(t0(), &mut transport).is_some());
    }
}
