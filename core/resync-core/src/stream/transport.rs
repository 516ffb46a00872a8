//! The seam between the core and whatever actually holds sockets.
//!
//! Hosts implement [`StreamTransport`] over their HTTP/SSE client. Every call
//! carries the generation it belongs to; the host passes that generation back
//! with each callback so superseded connections can be recognized.

use serde::Serialize;

use super::state::StreamKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenRequest {
    pub key: StreamKey,
    pub generation: u64,
    /// Last applied sequence; `None` starts from the server's current history.
    pub resume_from: Option<u64>,
}

pub trait StreamTransport {
    fn open(&mut self, request: OpenRequest);

    fn close(&mut self, key: &StreamKey, generation: u64);

    /// Checks whether the remote resource behind `key` still exists.
    /// The answer comes back through the owning manager's `probe_completed`;
    /// until it does, the stream waits in its probing phase with no deadline.
    fn probe(&mut self, key: &StreamKey, generation: u64);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum TransportCall {
    Open(OpenRequest),
    Close { key: StreamKey, generation: u64 },
    Probe { key: StreamKey, generation: u64 },
}

/// Transport that only records calls. Used by the simulator and tests.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Vec<TransportCall>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[TransportCall] {
        &self.calls
    }

    pub fn drain(&mut self) -> Vec<TransportCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn opens(&self) -> Vec<&OpenRequest> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Open(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn last_open_for(&self, key: &StreamKey) -> Option<&OpenRequest> {
        self.opens()
            .into_iter()
            .rev()
            .find(|request| &request.key == key)
    }
}

impl StreamTransport for RecordingTransport {
    fn open(&mut self, request: OpenRequest) {
        self.calls.push(TransportCall::Open(request));
    }

    fn close(&mut self, key: &StreamKey, generation: u64) {
        self.calls.push(TransportCall::Close {
            key: key.clone(),
            generation,
        });
    }

    fn probe(&mut self, key: &StreamKey, generation: u64) {
        self.calls.push(TransportCall::Probe {
            key: key.clone(),
            generation,
        });
    }
}
