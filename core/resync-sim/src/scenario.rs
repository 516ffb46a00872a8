//! JSON-lines scenarios: one timed input per line, one report per input.
//!
//! ```text
//! {"at_ms": 0, "input": {"type": "start"}}
//! {"at_ms": 10, "input": {"type": "global_open"}}
//! {"at_ms": 500, "input": {"type": "global_frame", "frame": "id: 17\ndata: {\"type\":\"session.idle\"}"}}
//! {"at_ms": 26000, "input": {"type": "signal", "signal": "visibility", "visible": true}}
//! ```
//!
//! Frames are either raw SSE blocks or `{id, event, data}` objects. Omitting
//! `generation` targets whatever connection is current at that step.

use std::io::{BufRead, Write};

use chrono::{DateTime, Duration, Utc};
use resync_core::{
    EngineEvent, ProbeResult, RecordingTransport, ResumeSignal, StreamKey, StreamStatus,
    SyncConfig, SyncEngine, TerminalSummary, TransportCall,
};
use resync_protocol::{parse_sse_block, SseFrame};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SimError;

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    pub input: Input,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Start,
    GlobalOpen {
        #[serde(default)]
        generation: Option<u64>,
    },
    GlobalFrame {
        #[serde(default)]
        generation: Option<u64>,
        frame: FrameInput,
    },
    GlobalError {
        #[serde(default)]
        generation: Option<u64>,
        error: String,
    },
    TerminalFrame {
        session_id: String,
        #[serde(default)]
        generation: Option<u64>,
        frame: FrameInput,
    },
    TerminalError {
        session_id: String,
        #[serde(default)]
        generation: Option<u64>,
        error: String,
    },
    UiStateFrame {
        #[serde(default)]
        generation: Option<u64>,
        frame: FrameInput,
    },
    Signal(ResumeSignal),
    Tick,
    Track {
        session_ids: Vec<String>,
    },
    Remove {
        session_id: String,
    },
    DisconnectTerminal {
        session_id: String,
    },
    Probe {
        key: StreamKey,
        #[serde(default)]
        generation: Option<u64>,
        exists: bool,
    },
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::Start => "start",
            Input::GlobalOpen { .. } => "global_open",
            Input::GlobalFrame { .. } => "global_frame",
            Input::GlobalError { .. } => "global_error",
            Input::TerminalFrame { .. } => "terminal_frame",
            Input::TerminalError { .. } => "terminal_error",
            Input::UiStateFrame { .. } => "ui_state_frame",
            Input::Signal(_) => "signal",
            Input::Tick => "tick",
            Input::Track { .. } => "track",
            Input::Remove { .. } => "remove",
            Input::DisconnectTerminal { .. } => "disconnect_terminal",
            Input::Probe { .. } => "probe",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FrameInput {
    Raw(String),
    Parsed(SseFrame),
}

impl FrameInput {
    fn to_frame(&self) -> Option<SseFrame> {
        match self {
            FrameInput::Raw(block) => parse_sse_block(block),
            FrameInput::Parsed(frame) => Some(frame.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub status: StreamStatus,
    pub cursor: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub line: usize,
    pub at_ms: u64,
    pub input: &'static str,
    pub events: Vec<EngineEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transport: Vec<TransportCall>,
    pub visible: bool,
    pub global: StreamView,
    pub ui_state_version: u64,
    pub terminals: Vec<TerminalSummary>,
    pub pending_sends: usize,
}

/// Drives one engine through a scenario against a recording transport.
pub struct Runner {
    engine: SyncEngine,
    transport: RecordingTransport,
    origin: DateTime<Utc>,
}

impl Runner {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            engine: SyncEngine::new(config),
            transport: RecordingTransport::new(),
            origin: DateTime::<Utc>::default(),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Wall-clock instant `at_ms` after the scenario origin.
    fn instant(&self, line: usize, at_ms: u64) -> Result<DateTime<Utc>, SimError> {
        i64::try_from(at_ms)
            .ok()
            .and_then(|ms| self.origin.checked_add_signed(Duration::milliseconds(ms)))
            .ok_or(SimError::TimeOutOfRange { line, at_ms })
    }

    pub fn apply(&mut self, line: usize, step: &Step) -> Result<StepReport, SimError> {
        let now = self.instant(line, step.at_ms)?;
        let (events, error) = match self.dispatch(&step.input, now) {
            Ok(events) => (events, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        debug!(
            line,
            at_ms = step.at_ms,
            input = step.input.name(),
            events = events.len(),
            "Scenario step applied"
        );

        let global = self.engine.global();
        Ok(StepReport {
            line,
            at_ms: step.at_ms,
            input: step.input.name(),
            events,
            error,
            transport: self.transport.drain(),
            visible: self.engine.is_visible(),
            global: StreamView {
                status: global.status(),
                cursor: global.cursor(),
                generation: global.generation(),
            },
            ui_state_version: self.engine.ui_state().version(),
            terminals: self.engine.terminals().summaries(),
            pending_sends: self.engine.optimistic().len(),
        })
    }

    fn dispatch(
        &mut self,
        input: &Input,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<EngineEvent>, String> {
        let transport = &mut self.transport;
        let engine = &mut self.engine;
        let current = |engine: &SyncEngine, key: &StreamKey, explicit: Option<u64>| {
            explicit
                .or_else(|| engine.generation(key))
                .unwrap_or_default()
        };

        let events = match input {
            Input::Start => engine.start(now, transport),
            Input::GlobalOpen { generation } => {
                let generation = current(engine, &StreamKey::Global, *generation);
                engine.on_global_open(generation, now, transport)
            }
            Input::GlobalFrame { generation, frame } => {
                let generation = current(engine, &StreamKey::Global, *generation);
                engine.on_global_frame(generation, &require_frame(frame)?, now, transport)?
            }
            Input::GlobalError { generation, error } => {
                let generation = current(engine, &StreamKey::Global, *generation);
                engine.on_global_error(generation, error.as_str(), now, transport)
            }
            Input::TerminalFrame {
                session_id,
                generation,
                frame,
            } => {
                let key = StreamKey::Terminal(session_id.clone());
                let generation = current(engine, &key, *generation);
                engine.on_terminal_frame(
                    session_id,
                    generation,
                    &require_frame(frame)?,
                    now,
                    transport,
                )?
            }
            Input::TerminalError {
                session_id,
                generation,
                error,
            } => {
                let key = StreamKey::Terminal(session_id.clone());
                let generation = current(engine, &key, *generation);
                engine.on_terminal_error(session_id, generation, error.as_str(), now, transport)
            }
            Input::UiStateFrame { generation, frame } => {
                let generation = current(engine, &StreamKey::UiState, *generation);
                engine.on_ui_state_frame(generation, &require_frame(frame)?, now, transport)?
            }
            Input::Signal(signal) => engine.on_signal(*signal, now, transport),
            Input::Tick => engine.tick(now, transport),
            Input::Track { session_ids } => engine.track_sessions(session_ids, now, transport),
            Input::Remove { session_id } => {
                if engine.remove_session(session_id, transport) {
                    vec![EngineEvent::SessionsRemoved {
                        session_ids: vec![session_id.clone()],
                    }]
                } else {
                    Vec::new()
                }
            }
            Input::DisconnectTerminal { session_id } => {
                engine.disconnect_terminal(session_id, transport)?;
                Vec::new()
            }
            Input::Probe {
                key,
                generation,
                exists,
            } => {
                let generation = current(engine, key, *generation);
                let result = if *exists {
                    ProbeResult::Exists
                } else {
                    ProbeResult::Gone
                };
                engine.probe_completed(key, generation, result, now, transport)
            }
        };
        Ok(events)
    }
}

fn require_frame(frame: &FrameInput) -> std::result::Result<SseFrame, String> {
    frame
        .to_frame()
        .ok_or_else(|| "SSE block carries no data".to_string())
}

/// Reads steps from `reader`, applies them in order, and writes one JSON report per step.
///
/// Blank lines and lines starting with `#` are skipped. Steps must not go back in time.
pub fn replay<R: BufRead, W: Write>(
    config: SyncConfig,
    reader: R,
    mut out: W,
) -> Result<Runner, SimError> {
    let mut runner = Runner::new(config);
    let mut last_at = 0;

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(SimError::Io)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let step: Step = serde_json::from_str(trimmed).map_err(|source| SimError::Parse {
            line: line_number,
            source,
        })?;
        if step.at_ms < last_at {
            return Err(SimError::TimeWentBackwards {
                line: line_number,
                at_ms: step.at_ms,
                previous: last_at,
            });
        }
        last_at = step.at_ms;

        let report = runner.apply(line_number, &step)?;
        serde_json::to_writer(&mut out, &report).map_err(|source| SimError::Encode {
            line: line_number,
            source,
        })?;
        writeln!(out).map_err(SimError::Io)?;
    }

    out.flush().map_err(SimError::Io)?;
    Ok(runner)
}
