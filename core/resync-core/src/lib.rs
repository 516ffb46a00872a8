//! # resync-core
//!
//! Client-side stream resynchronization: keeps one global event stream and N
//! per-session streams (terminal output, terminal UI state) connected and caught
//! up across dropped connections, sleep, backgrounding, and server history gaps.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The host owns sockets and timers
//!   and drives the core with `now` timestamps, callbacks, and lifecycle signals.
//! - **Not thread-safe**: One owner per manager. Hosts that share one wrap it themselves.
//! - **Generation-guarded**: Every connection attempt bumps a generation; callbacks
//!   from a superseded connection are dropped before they can touch state.
//! - **Errors stay inside**: Transport drops and backoff never surface as `Err`.
//!   They show up as stream status. Only configuration, decoding, and API misuse fail.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resync_core::{load_config, RecordingTransport, SyncEngine};
//!
//! let mut engine = SyncEngine::new(load_config(None)?);
//! let mut transport = RecordingTransport::new();
//! let events = engine.start(chrono::Utc::now(), &mut transport);
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod optimistic;
pub mod resume;
pub mod router;
pub mod stream;
pub mod terminal;
pub mod throttle;
pub mod ui_state;

pub use config::*;
pub use engine::{EngineEvent, EngineSnapshot, SyncEngine};
pub use error::{Result, SyncError};
pub use liveness::{BufferedJump, LivenessWatchdog};
pub use optimistic::{
    AckOutcome, AuthoritativeMessage, MessageRole, OptimisticEchoReconciler, OptimisticEntry,
    OptimisticStatus,
};
pub use resume::{
    AppResumeCoordinator, RefetchPlan, ResumeContext, ResumeDecision, ResumePlan, ResumeReason,
    ResumeSignal, SuspendReason,
};
pub use router::{
    subsystem_for, GlobalEventRouter, GlobalEventSink, RouteOutcome, RouterStats, Subsystem,
};
pub use stream::*;
pub use terminal::{OutputBuffer, TerminalOutcome, TerminalStreamManager, TerminalSummary};
pub use throttle::Throttle;
pub use ui_state::{TerminalUiStateSync, UiStateOutcome};
