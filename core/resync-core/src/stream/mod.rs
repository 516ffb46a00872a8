//! Resumable streams.
//!
//! - [`state`]: per-stream bookkeeping (status, cursor, generation, attempts)
//! - [`backoff`]: reconnect delay policy
//! - [`client`]: the reconnect/resume state machine for one stream
//! - [`transport`]: the host-implemented seam that actually opens connections

pub mod backoff;
pub mod client;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use client::{CloseMode, ProbeResult, ResumableStreamClient, StreamInput, StreamOutcome};
pub use state::{ExitInfo, GapMarker, StreamKey, StreamState, StreamStatus};
pub use transport::{OpenRequest, RecordingTransport, StreamTransport, TransportCall};
