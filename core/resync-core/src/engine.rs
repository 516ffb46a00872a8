//! Single ingestion point wiring every stream and policy together.
//!
//! The host owns sockets, timers, and the REST layer. It forwards transport
//! callbacks, lifecycle signals, and timer ticks here, and executes the
//! returned [`EngineEvent`]s. Nothing in the engine blocks or sleeps.

use chrono::{DateTime, Utc};
use resync_protocol::{parse_global_frame, parse_terminal_event, GlobalFrame, SseFrame};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::liveness::{BufferedJump, LivenessWatchdog};
use crate::optimistic::{
    AckOutcome, AuthoritativeMessage, OptimisticEchoReconciler, OptimisticEntry,
};
use crate::resume::{AppResumeCoordinator, RefetchPlan, ResumeContext, ResumeDecision, ResumeSignal};
use crate::router::{GlobalEventRouter, GlobalEventSink, RouteOutcome, RouterStats, Subsystem};
use crate::stream::{
    BackoffPolicy, CloseMode, ProbeResult, ResumableStreamClient, StreamInput, StreamKey,
    StreamOutcome, StreamState, StreamStatus, StreamTransport,
};
use crate::terminal::{TerminalOutcome, TerminalStreamManager, TerminalSummary};
use crate::throttle::Throttle;
use crate::ui_state::{TerminalUiStateSync, UiStateOutcome};

/// Work the host must carry out, or a state change it may want to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EngineEvent {
    Opened { key: StreamKey, generation: u64 },
    Global { outcome: StreamOutcome },
    Routed { outcome: RouteOutcome },
    Terminal { session_id: String, outcome: TerminalOutcome },
    UiState { outcome: UiStateOutcome },
    Resume { decision: ResumeDecision },
    /// Targeted refetch after a replay gap; the stream itself stays up.
    Refetch { plan: RefetchPlan },
    RefreshLists,
    LoadPage { page_size: usize },
    SessionsRemoved { session_ids: Vec<String> },
    /// A send held while offline can go out now.
    SendReleased { session_id: String, key: String },
    ClockJump { gap_ms: u64 },
    Stalled { key: StreamKey },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub visible: bool,
    pub global: StreamState,
    pub ui_state: StreamState,
    pub ui_state_version: u64,
    pub terminals: Vec<TerminalSummary>,
    pub optimistic: Vec<OptimisticEntry>,
    pub router: RouterStats,
    pub buffered_jump: Option<BufferedJump>,
    pub expanded_directories: usize,
}

#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    global: ResumableStreamClient,
    router: GlobalEventRouter,
    terminals: TerminalStreamManager,
    ui_state: TerminalUiStateSync,
    optimistic: OptimisticEchoReconciler,
    watchdog: LivenessWatchdog,
    coordinator: AppResumeCoordinator,
    pagination: Throttle,
    expanded_directories: usize,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let backoff = BackoffPolicy::from(&config.backoff);
        Self {
            global: ResumableStreamClient::new(StreamKey::Global, backoff),
            router: GlobalEventRouter::new(config.throttle.list_refresh_min_spacing_ms),
            terminals: TerminalStreamManager::new(&config.terminal, backoff),
            ui_state: TerminalUiStateSync::new(backoff),
            optimistic: OptimisticEchoReconciler::new(),
            watchdog: LivenessWatchdog::new(config.liveness.clone()),
            coordinator: AppResumeCoordinator::new(
                config.resume.clone(),
                config.pagination.clone(),
            ),
            pagination: Throttle::with_trailing(config.throttle.pagination_min_spacing_ms),
            expanded_directories: 0,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn global(&self) -> &ResumableStreamClient {
        &self.global
    }

    pub fn terminals(&self) -> &TerminalStreamManager {
        &self.terminals
    }

    pub fn ui_state(&self) -> &TerminalUiStateSync {
        &self.ui_state
    }

    pub fn optimistic(&self) -> &OptimisticEchoReconciler {
        &self.optimistic
    }

    pub fn is_visible(&self) -> bool {
        self.coordinator.is_visible()
    }

    pub fn subscribe(&mut self, subsystems: &[Subsystem], sink: Box<dyn GlobalEventSink>) {
        self.router.subscribe(subsystems, sink);
    }

    /// Current generation of a stream, for tagging host callbacks.
    pub fn generation(&self, key: &StreamKey) -> Option<u64> {
        match key {
            StreamKey::Global => Some(self.global.generation()),
            StreamKey::UiState => Some(self.ui_state.client().generation()),
            StreamKey::Terminal(id) => self.terminals.generation(id),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Startup and explicit connect/disconnect
    // ═══════════════════════════════════════════════════════════════════

    pub fn start<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        self.watchdog.start(now);
        let mut events = vec![
            EngineEvent::Opened {
                key: StreamKey::Global,
                generation: self.global.connect(now, None, transport),
            },
            EngineEvent::Opened {
                key: StreamKey::UiState,
                generation: self.ui_state.connect(now, transport),
            },
        ];
        events.extend(self.open_tracked_terminals(now, transport));
        info!(terminals = self.terminals.len(), "Sync engine started");
        events
    }

    pub fn connect_global<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> u64 {
        self.global.connect(now, None, transport)
    }

    pub fn disconnect_global<T: StreamTransport + ?Sized>(&mut self, transport: &mut T) -> bool {
        self.global.close(CloseMode::Manual, transport)
    }

    pub fn track_sessions<T: StreamTransport + ?Sized>(
        &mut self,
        session_ids: &[String],
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let removed = self.terminals.set_tracked(session_ids, transport);
        let mut events = Vec::new();
        if !removed.is_empty() {
            events.push(EngineEvent::SessionsRemoved {
                session_ids: removed,
            });
        }
        events.extend(self.open_tracked_terminals(now, transport));
        events
    }

    pub fn remove_session<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        transport: &mut T,
    ) -> bool {
        self.terminals.remove(session_id, transport)
    }

    pub fn connect_terminal<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> u64 {
        self.terminals.connect(session_id, now, transport)
    }

    pub fn disconnect_terminal<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        transport: &mut T,
    ) -> Result<bool> {
        self.terminals.disconnect(session_id, transport)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Global stream
    // ═══════════════════════════════════════════════════════════════════

    /// The transport confirmed the global connection is open.
    pub fn on_global_open<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        self.on_global_input(generation, StreamInput::Connected, now, transport)
    }

    pub fn on_global_error<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        error: impl Into<String>,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        self.on_global_input(
            generation,
            StreamInput::TransportError(error.into()),
            now,
            transport,
        )
    }

    pub fn on_global_input<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        input: StreamInput,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let was_connected = self.global.status() == StreamStatus::Connected;
        let outcome = self.global.handle(generation, input, now, transport);
        let mut events = vec![EngineEvent::Global { outcome }];
        if !was_connected && self.global.status() == StreamStatus::Connected {
            events.extend(self.release_held_sends());
        }
        events
    }

    pub fn on_global_frame<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        frame: &SseFrame,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Result<Vec<EngineEvent>> {
        if frame.is_heartbeat() {
            return Ok(self.on_global_input(generation, StreamInput::Heartbeat, now, transport));
        }

        // Generation check and cursor move happen before decoding: a stale
        // connection's frame must not reach the router even if it parses.
        let mut events =
            self.on_global_input(generation, StreamInput::Data { seq: frame.seq() }, now, transport);
        if !matches!(
            events.first(),
            Some(EngineEvent::Global {
                outcome: StreamOutcome::Data { .. }
            })
        ) {
            return Ok(events);
        }

        let event = match parse_global_frame(frame) {
            Ok(GlobalFrame::Event(event)) => event,
            Ok(GlobalFrame::Heartbeat) => return Ok(events),
            Err(info) => {
                warn!(code = %info.code, message = %info.message, "Malformed global frame");
                return Err(SyncError::InvalidFrame {
                    stream: StreamKey::Global.to_string(),
                    info,
                });
            }
        };

        let outcome = self.router.route(&event, now)?;
        events.push(EngineEvent::Routed {
            outcome: outcome.clone(),
        });
        match outcome {
            RouteOutcome::ReplayGap { gap } => {
                if let Some(seq) = gap.restart_cursor() {
                    self.global.rebase_cursor(generation, seq);
                }
                events.push(EngineEvent::Refetch {
                    plan: RefetchPlan::everything(self.current_page_size()),
                });
            }
            RouteOutcome::UiState { event } => {
                let applied = self.ui_state.apply_event(&event);
                events.extend(self.after_ui_state(applied, now, transport));
            }
            RouteOutcome::Delivered {
                refresh_lists: true,
                ..
            } => events.push(EngineEvent::RefreshLists),
            _ => {}
        }
        Ok(events)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Terminal and UI-state streams
    // ═══════════════════════════════════════════════════════════════════

    pub fn on_terminal_frame<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        frame: &SseFrame,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Result<Vec<EngineEvent>> {
        let outcome = if frame.is_heartbeat() {
            self.terminals
                .on_heartbeat(session_id, generation, now, transport)
        } else {
            let event = parse_terminal_event(&frame.data).map_err(|info| {
                warn!(session_id = %session_id, code = %info.code, "Malformed terminal frame");
                SyncError::InvalidFrame {
                    stream: StreamKey::Terminal(session_id.to_string()).to_string(),
                    info,
                }
            })?;
            self.terminals
                .handle(session_id, generation, event, now, transport)
        };
        Ok(vec![EngineEvent::Terminal {
            session_id: session_id.to_string(),
            outcome,
        }])
    }

    pub fn on_terminal_error<T: StreamTransport + ?Sized>(
        &mut self,
        session_id: &str,
        generation: u64,
        error: impl Into<String>,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let outcome = self
            .terminals
            .on_transport_error(session_id, generation, error, now, transport);
        vec![EngineEvent::Terminal {
            session_id: session_id.to_string(),
            outcome,
        }]
    }

    pub fn on_ui_state_frame<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        frame: &SseFrame,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Result<Vec<EngineEvent>> {
        let outcome = self
            .ui_state
            .handle_frame(generation, frame, now, transport)?;
        Ok(self.after_ui_state(outcome, now, transport))
    }

    pub fn on_ui_state_error<T: StreamTransport + ?Sized>(
        &mut self,
        generation: u64,
        error: impl Into<String>,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let outcome = self
            .ui_state
            .on_transport_error(generation, error, now, transport);
        vec![EngineEvent::UiState {
            outcome: UiStateOutcome::Stream { outcome },
        }]
    }

    /// Answer to a `StreamTransport::probe` call.
    pub fn probe_completed<T: StreamTransport + ?Sized>(
        &mut self,
        key: &StreamKey,
        generation: u64,
        result: ProbeResult,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        match key {
            StreamKey::Terminal(id) => {
                let outcome = self
                    .terminals
                    .probe_completed(id, generation, result, now, transport);
                let mut events = Vec::new();
                if outcome == TerminalOutcome::Removed {
                    events.push(EngineEvent::SessionsRemoved {
                        session_ids: vec![id.clone()],
                    });
                }
                events.push(EngineEvent::Terminal {
                    session_id: id.clone(),
                    outcome,
                });
                events
            }
            StreamKey::Global => vec![EngineEvent::Global {
                outcome: self
                    .global
                    .probe_completed(generation, result, now, transport),
            }],
            StreamKey::UiState => {
                debug!(generation, "UI-state stream does not probe; ignoring result");
                Vec::new()
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle signals and timers
    // ═══════════════════════════════════════════════════════════════════

    pub fn on_signal<T: StreamTransport + ?Sized>(
        &mut self,
        signal: ResumeSignal,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        // Only the visibility-restored transition consumes a jump buffered while hidden.
        let visibility_restored = signal == ResumeSignal::Visibility { visible: true };
        let buffered_jump_ms = if visibility_restored {
            self.watchdog.buffered().map(|jump| jump.max_gap_ms)
        } else {
            None
        };
        let context = ResumeContext {
            max_chunk_age_ms: self.max_chunk_age_ms(now),
            expanded_directories: self.expanded_directories,
            has_global_stream: self.global.is_open(),
            buffered_jump_ms,
        };

        let decision = self.coordinator.ingest(signal, now, context);
        if visibility_restored && matches!(decision, ResumeDecision::Resync(_)) {
            self.watchdog.take_buffered();
        }
        let mut events = vec![EngineEvent::Resume { decision }];
        match decision {
            ResumeDecision::Suspend { .. } => {
                self.global.close(CloseMode::Suspend, transport);
                self.ui_state.close(CloseMode::Suspend, transport);
                let suspended = self.terminals.suspend_all(transport);
                debug!(terminals = suspended, "Streams suspended");
            }
            ResumeDecision::Resync(plan) => {
                if plan.force_reconnect {
                    events.extend(self.reopen_global(now, transport));
                    events.extend(self.reopen_ui_state(now, transport));
                    for (session_id, generation) in self.terminals.force_reconnect_all(now, transport)
                    {
                        events.push(EngineEvent::Opened {
                            key: StreamKey::Terminal(session_id),
                            generation,
                        });
                    }
                } else {
                    if plan.reconnect_global {
                        events.extend(self.reopen_global(now, transport));
                    }
                    if !self.ui_state.client().is_open() {
                        events.extend(self.reopen_ui_state(now, transport));
                    }
                }
                events.extend(self.open_tracked_terminals(now, transport));
            }
            ResumeDecision::Ignored | ResumeDecision::Debounced => {}
        }
        events
    }

    /// Earliest time the host should call [`tick`](Self::tick) again.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        [
            self.watchdog.next_deadline(),
            self.global.next_deadline(),
            self.ui_state.client().next_deadline(),
            self.terminals.next_deadline(),
            self.router.next_deadline(),
            self.pagination.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Runs the watchdog, stall checks, reconnect timers, and trailing throttles.
    pub fn tick<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let visible = self.coordinator.is_visible();

        if self.watchdog.is_due(now) {
            if let Some(gap_ms) = self.watchdog.tick(now, visible) {
                events.push(EngineEvent::ClockJump { gap_ms });
                events.extend(self.on_signal(ResumeSignal::ClockJump { gap_ms }, now, transport));
            }
        }

        events.extend(self.reconnect_stalled(now, visible, transport));

        if let Some(outcome) = self.global.poll(now, transport) {
            events.push(EngineEvent::Global { outcome });
        }
        if let Some(outcome) = self.ui_state.poll(now, transport) {
            events.push(EngineEvent::UiState {
                outcome: UiStateOutcome::Stream { outcome },
            });
        }
        for (session_id, outcome) in self.terminals.poll_timers(now, transport) {
            events.push(EngineEvent::Terminal {
                session_id,
                outcome: TerminalOutcome::Stream { outcome },
            });
        }

        if self.router.poll_list_refresh(now) {
            events.push(EngineEvent::RefreshLists);
        }
        if self.pagination.poll(now) {
            events.push(EngineEvent::LoadPage {
                page_size: self.current_page_size(),
            });
        }
        events
    }

    // ═══════════════════════════════════════════════════════════════════
    // Pagination
    // ═══════════════════════════════════════════════════════════════════

    pub fn set_expanded_directories(&mut self, count: usize) {
        self.expanded_directories = count;
    }

    /// Viewport-preserving "load more". Returns the page size when it may run
    /// now; otherwise a trailing load is armed and surfaces from `tick`.
    pub fn request_page_load(&mut self, now: DateTime<Utc>) -> Option<usize> {
        self.pagination
            .request(now)
            .then(|| self.current_page_size())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Optimistic sends
    // ═══════════════════════════════════════════════════════════════════

    pub fn begin_send(
        &mut self,
        session_id: &str,
        text: &str,
        files: Vec<String>,
        messages: &[AuthoritativeMessage],
        now: DateTime<Utc>,
    ) -> OptimisticEntry {
        let connected = self.global.status() == StreamStatus::Connected;
        self.optimistic
            .begin(session_id, text, files, messages, now, connected)
            .clone()
    }

    pub fn send_succeeded(&mut self, session_id: &str) -> Result<()> {
        self.optimistic.mark_sent(session_id)
    }

    /// Discards the placeholder and returns it so the caller can restore the draft.
    pub fn send_failed(&mut self, session_id: &str) -> Result<OptimisticEntry> {
        self.optimistic
            .clear_on_failure(session_id)
            .ok_or_else(|| SyncError::NoPendingSend {
                session_id: session_id.to_string(),
            })
    }

    pub fn observe_messages(
        &mut self,
        session_id: &str,
        messages: &[AuthoritativeMessage],
    ) -> AckOutcome {
        self.optimistic.observe(session_id, messages)
    }

    pub fn switch_session(&mut self, session_id: &str) -> Vec<OptimisticEntry> {
        self.optimistic.switch_session(session_id)
    }

    pub fn set_revert_boundary(&mut self, session_id: &str, boundary: Option<String>) {
        self.optimistic.set_revert_boundary(session_id, boundary);
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            visible: self.coordinator.is_visible(),
            global: self.global.state().clone(),
            ui_state: self.ui_state.client().state().clone(),
            ui_state_version: self.ui_state.version(),
            terminals: self.terminals.summaries(),
            optimistic: self.optimistic.entries(),
            router: self.router.stats().clone(),
            buffered_jump: self.watchdog.buffered(),
            expanded_directories: self.expanded_directories,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════

    fn current_page_size(&self) -> usize {
        self.coordinator.page_size(0, self.expanded_directories)
    }

    fn max_chunk_age_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        let global = (self.global.status() == StreamStatus::Connected)
            .then(|| self.global.chunk_age_ms(now))
            .flatten();
        global.max(self.terminals.max_chunk_age_ms(now))
    }

    fn release_held_sends(&mut self) -> Vec<EngineEvent> {
        self.optimistic
            .flush_on_connected()
            .into_iter()
            .map(|entry| EngineEvent::SendReleased {
                session_id: entry.session_id,
                key: entry.key,
            })
            .collect()
    }

    fn reopen_global<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<EngineEvent> {
        self.global
            .force_reconnect(now, transport)
            .map(|generation| EngineEvent::Opened {
                key: StreamKey::Global,
                generation,
            })
    }

    fn reopen_ui_state<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Option<EngineEvent> {
        self.ui_state
            .force_reconnect(now, transport)
            .map(|generation| EngineEvent::Opened {
                key: StreamKey::UiState,
                generation,
            })
    }

    fn open_tracked_terminals<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        self.terminals
            .ensure_all_tracked(now, transport)
            .into_iter()
            .map(|(session_id, generation)| EngineEvent::Opened {
                key: StreamKey::Terminal(session_id),
                generation,
            })
            .collect()
    }

    fn after_ui_state<T: StreamTransport + ?Sized>(
        &mut self,
        outcome: UiStateOutcome,
        now: DateTime<Utc>,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let sessions_changed = matches!(
            outcome,
            UiStateOutcome::Applied {
                sessions_changed: true,
                ..
            }
        );
        let mut events = vec![EngineEvent::UiState { outcome }];
        if sessions_changed {
            let session_ids = self.ui_state.session_ids();
            events.extend(self.track_sessions(&session_ids, now, transport));
        }
        events
    }

    fn reconnect_stalled<T: StreamTransport + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        visible: bool,
        transport: &mut T,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        if self
            .watchdog
            .is_stalled(self.global.status(), self.global.chunk_age_ms(now), visible)
        {
            info!(stream = %StreamKey::Global, "Stream silently stalled; reconnecting");
            events.push(EngineEvent::Stalled {
                key: StreamKey::Global,
            });
            events.extend(self.reopen_global(now, transport));
        }

        let ui_client = self.ui_state.client();
        if self
            .watchdog
            .is_stalled(ui_client.status(), ui_client.chunk_age_ms(now), visible)
        {
            info!(stream = %StreamKey::UiState, "Stream silently stalled; reconnecting");
            events.push(EngineEvent::Stalled {
                key: StreamKey::UiState,
            });
            events.extend(self.reopen_ui_state(now, transport));
        }

        for session_id in self.terminals.stalled(now, &self.watchdog, visible) {
            info!(session_id = %session_id, "Terminal stream silently stalled; reconnecting");
            let key = StreamKey::Terminal(session_id.clone());
            events.push(EngineEvent::Stalled { key: key.clone() });
            if let Some(generation) = self.terminals.force_reconnect(&session_id, now, transport) {
                events.push(EngineEvent::Opened { key, generation });
            }
        }
        events
    }
}
