//! Wire types and parsers for the resumable event streams.
//!
//! This crate is shared by the resync core and its tools so the frame shapes
//! cannot drift. Nothing here performs I/O: parsers take text that a host
//! transport already received and return typed frames.
//!
//! Three stream families are covered:
//! - the account-wide global stream (`Last-Event-ID` resumption),
//! - per-session terminal output streams (`?since=<seq>` resumption),
//! - the terminal UI-state stream (`?since=<seq>` resumption, versioned state).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024; // mirrors the server replay budget

/// Query parameter carrying the last applied sequence for terminal/UI-state streams.
pub const SINCE_QUERY_PARAM: &str = "since";
/// Header carrying the last applied sequence for the global stream.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub const HEARTBEAT_EVENT: &str = "heartbeat";
pub const REPLAY_GAP_EVENT: &str = "replay-gap";
pub const REPLAY_GAP_TYPE: &str = "opencode-studio:replay-gap";
pub const UPSTREAM_DISCONNECTED_TYPE: &str = "opencode-studio:upstream-disconnected";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SSE framing
// ═══════════════════════════════════════════════════════════════════════════════

/// One server-sent event block.
///
/// Comment-only blocks (`: heartbeat`) are surfaced as frames with
/// `event = Some("heartbeat")` and empty data so liveness tracking sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn heartbeat() -> Self {
        Self::default().with_event(HEARTBEAT_EVENT)
    }

    pub fn is_heartbeat(&self) -> bool {
        // Keep-alive events may carry a placeholder body such as `{}`.
        self.event.as_deref() == Some(HEARTBEAT_EVENT)
    }

    /// Sequence carried in the SSE `id:` field. Non-numeric ids carry no position.
    pub fn seq(&self) -> Option<u64> {
        self.id.as_deref().and_then(parse_seq)
    }
}

pub fn parse_seq(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

/// Parses a single SSE block (the text between two blank lines).
pub fn parse_sse_block(block: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut saw_comment = false;
    let mut saw_field = false;

    for raw_line in block.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(':') {
            saw_comment = true;
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => {
                saw_field = true;
                frame.id = Some(value.to_string());
            }
            "event" => {
                saw_field = true;
                frame.event = Some(value.to_string());
            }
            "data" => {
                saw_field = true;
                data_lines.push(value);
            }
            // `retry:` and unknown fields are ignored per the SSE grammar.
            _ => {}
        }
    }

    if !saw_field {
        return saw_comment.then(SseFrame::heartbeat);
    }

    frame.data = data_lines.join("\n");
    Some(frame)
}

/// Incremental decoder turning arbitrary text chunks into complete SSE frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// A chunk ended on `\r`; it may be the first half of a CRLF.
    pending_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame completed by it.
    ///
    /// A partial block larger than [`MAX_FRAME_BYTES`] is discarded and reported.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<SseFrame>, ErrorInfo> {
        let mut text = String::with_capacity(chunk.len() + 1);
        if std::mem::take(&mut self.pending_cr) {
            text.push('\r');
        }
        text.push_str(chunk);
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }
        self.buffer.push_str(&text.replace("\r\n", "\n"));

        let mut frames = Vec::new();
        while let Some(index) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..index + 2).collect();
            if let Some(frame) = parse_sse_block(&block) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_FRAME_BYTES {
            let size = self.buffer.len();
            self.reset();
            return Err(ErrorInfo::new(
                "frame_too_large",
                format!("partial SSE block of {} bytes exceeded the frame limit", size),
            ));
        }

        Ok(frames)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() + usize::from(self.pending_cr)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_cr = false;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Terminal output stream
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TerminalStreamEvent {
    Connected {
        #[serde(default)]
        runtime: Option<String>,
        #[serde(default, rename = "ptyBackend")]
        pty_backend: Option<String>,
    },
    Data {
        seq: u64,
        data: String,
    },
    /// The requested `since` fell out of the server history window.
    Resync {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        since: Option<u64>,
        #[serde(default, rename = "firstAvailableSeq")]
        first_available_seq: Option<u64>,
        #[serde(default, rename = "lastSeq")]
        last_seq: Option<u64>,
    },
    ReplayGap {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        since: Option<u64>,
        #[serde(default, rename = "firstAvailableSeq")]
        first_available_seq: Option<u64>,
        #[serde(default, rename = "lastSeq")]
        last_seq: Option<u64>,
    },
    Exit {
        #[serde(default, rename = "exitCode")]
        exit_code: Option<i32>,
        #[serde(default, deserialize_with = "string_or_number")]
        signal: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

pub fn parse_terminal_event(data: &str) -> Result<TerminalStreamEvent, ErrorInfo> {
    if data.trim().is_empty() {
        return Err(ErrorInfo::new("empty_frame", "terminal frame had no data"));
    }
    serde_json::from_str(data).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("terminal frame was not valid JSON: {}", err),
        )
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global event stream
// ═══════════════════════════════════════════════════════════════════════════════

/// A decoded global event, independent of whether the server wrapped it in a
/// `{directory, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvent {
    /// Trimmed, lowercased event type used for routing.
    pub event_type: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub properties: Value,
    /// The full (unwrapped) payload object.
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GlobalFrame {
    Heartbeat,
    Event(GlobalEvent),
}

pub fn parse_global_frame(frame: &SseFrame) -> Result<GlobalFrame, ErrorInfo> {
    if frame.is_heartbeat() {
        return Ok(GlobalFrame::Heartbeat);
    }
    if frame.data.trim().is_empty() {
        return Err(ErrorInfo::new("empty_frame", "global frame had no data"));
    }

    let value: Value = serde_json::from_str(&frame.data).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("global frame was not valid JSON: {}", err),
        )
    })?;

    let directory = value
        .get("directory")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let payload = match value.get("payload") {
        Some(inner) if inner.get("type").is_some() => inner.clone(),
        _ => value,
    };

    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .map(|ty| ty.trim().to_ascii_lowercase())
        .filter(|ty| !ty.is_empty())
        .or_else(|| {
            // Control frames may only carry the SSE event name.
            frame
                .event
                .as_deref()
                .filter(|name| *name == REPLAY_GAP_EVENT)
                .map(|_| REPLAY_GAP_TYPE.to_string())
        })
        .ok_or_else(|| ErrorInfo::new("missing_type", "global frame had no event type"))?;

    let properties = payload.get("properties").cloned().unwrap_or(Value::Null);

    Ok(GlobalFrame::Event(GlobalEvent {
        event_type,
        directory,
        seq: frame.seq(),
        properties,
        payload,
    }))
}

/// Properties of an `opencode-studio:replay-gap` control event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayGapInfo {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub requested_last_event_id: Option<u64>,
    #[serde(default)]
    pub seq_at_subscribe: Option<u64>,
    #[serde(default)]
    pub gap_seq: Option<u64>,
}

impl ReplayGapInfo {
    pub fn from_properties(properties: &Value) -> Self {
        serde_json::from_value(properties.clone()).unwrap_or_default()
    }

    /// Cursor to restart from when the requested id is ahead of anything the
    /// server has issued, meaning its sequence was reset (restart or upgrade).
    pub fn restart_cursor(&self) -> Option<u64> {
        match (self.requested_last_event_id, self.seq_at_subscribe) {
            (Some(requested), Some(at_subscribe)) if requested > at_subscribe => {
                Some(self.gap_seq.unwrap_or(at_subscribe))
            }
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Terminal UI-state stream
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalUiState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub active_session_id: Option<String>,
    #[serde(default)]
    pub session_ids: Vec<String>,
    #[serde(default)]
    pub session_meta_by_id: BTreeMap<String, Value>,
    #[serde(default)]
    pub folders: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiStateOp {
    #[serde(rename = "state.replace")]
    Replace { state: TerminalUiState },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiStatePatchProperties {
    #[serde(default)]
    pub ops: Vec<UiStateOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiStateEvent {
    #[serde(rename = "terminal-ui-state.snapshot")]
    Snapshot { state: TerminalUiState },
    #[serde(rename = "terminal-ui-state.patch")]
    Patch {
        #[serde(default)]
        seq: Option<u64>,
        #[serde(default)]
        ts: Option<u64>,
        #[serde(default)]
        properties: UiStatePatchProperties,
    },
}

impl UiStateEvent {
    /// The newest full state carried by this event, if any.
    pub fn latest_state(&self) -> Option<&TerminalUiState> {
        match self {
            UiStateEvent::Snapshot { state } => Some(state),
            UiStateEvent::Patch { properties, .. } => {
                properties.ops.iter().rev().find_map(|op| match op {
                    UiStateOp::Replace { state } => Some(state),
                    UiStateOp::Unknown => None,
                })
            }
        }
    }

    pub fn seq(&self) -> Option<u64> {
        match self {
            UiStateEvent::Snapshot { .. } => None,
            UiStateEvent::Patch { seq, .. } => *seq,
        }
    }
}

pub fn parse_ui_state_event(data: &str) -> Result<UiStateEvent, ErrorInfo> {
    serde_json::from_str(data).map_err(|err| {
        ErrorInfo::new(
            "invalid_ui_state",
            format!("UI-state frame was not a snapshot or patch: {}", err),
        )
    })
}

pub fn parse_ui_state_value(value: &Value) -> Result<UiStateEvent, ErrorInfo> {
    serde_json::from_value(value.clone()).map_err(|err| {
        ErrorInfo::new(
            "invalid_ui_state",
            format!("UI-state payload was not a snapshot or patch: {}", err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_with_id_event_and_multiline_data() {
        let frame = parse_sse_block("id: 42\nevent: message\ndata: {\"a\":\ndata: 1}\n").unwrap();
        assert_eq!(frame.id.as_deref(), Some("42"));
        assert_eq!(frame.event.as_deref(), Some("message"));
        assert_eq!(frame.data, "{\"a\":\n1}");
        assert_eq!(frame.seq(), Some(42));
    }

    #[test]
    fn comment_only_block_is_heartbeat() {
        let frame = parse_sse_block(": heartbeat\n").unwrap();
        assert!(frame.is_heartbeat());
    }

    #[test]
    fn empty_block_yields_nothing() {
        assert!(parse_sse_block("\n\n").is_none());
    }

    #[test]
    fn non_numeric_id_has_no_seq() {
        let frame = parse_sse_block("id: abc\ndata: {}").unwrap();
        assert_eq!(frame.seq(), None);
    }

    #[test]
    fn decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("id: 1\r\ndata: {\"type\":").unwrap().is_empty());
        let frames = decoder.push("\"data\"}\r\n\r\n: heartbeat\n\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq(), Some(1));
        assert!(frames[1].is_heartbeat());
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn decoder_keeps_block_boundary_when_crlf_is_split() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("id: 1\r\ndata: {}\r\n\r").unwrap().is_empty());
        assert_eq!(decoder.pending_bytes(), "id: 1\ndata: {}\n".len() + 1);

        let frames = decoder.push("\nid: 2\r\ndata: {}\r\n\r\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq(), Some(1));
        assert_eq!(frames[0].data, "{}");
        assert_eq!(frames[1].seq(), Some(2));
        assert_eq!(frames[1].data, "{}");
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn replay_gap_restart_cursor_only_when_server_is_behind() {
        let restarted = ReplayGapInfo {
            requested_last_event_id: Some(500),
            seq_at_subscribe: Some(20),
            gap_seq: Some(20),
            ..ReplayGapInfo::default()
        };
        assert_eq!(restarted.restart_cursor(), Some(20));

        let evicted = ReplayGapInfo {
            requested_last_event_id: Some(12),
            seq_at_subscribe: Some(400),
            gap_seq: Some(300),
            ..ReplayGapInfo::default()
        };
        assert_eq!(evicted.restart_cursor(), None);
    }

    #[test]
    fn parses_terminal_events() {
        let data = parse_terminal_event(r#"{"type":"data","seq":7,"data":"ls\r\n"}"#).unwrap();
        assert_eq!(
            data,
            TerminalStreamEvent::Data {
                seq: 7,
                data: "ls\r\n".to_string()
            }
        );

        let resync = parse_terminal_event(
            r#"{"type":"resync","reason":"history_miss","since":3,"firstAvailableSeq":10,"lastSeq":20}"#,
        )
        .unwrap();
        assert!(matches!(
            resync,
            TerminalStreamEvent::Resync {
                first_available_seq: Some(10),
                last_seq: Some(20),
                ..
            }
        ));

        let exit = parse_terminal_event(r#"{"type":"exit","exitCode":0,"signal":9}"#).unwrap();
        assert_eq!(
            exit,
            TerminalStreamEvent::Exit {
                exit_code: Some(0),
                signal: Some("9".to_string())
            }
        );
    }

    #[test]
    fn unknown_terminal_event_type_is_tolerated() {
        let event = parse_terminal_event(r#"{"type":"resize","cols":80}"#).unwrap();
        assert_eq!(event, TerminalStreamEvent::Unknown);
    }

    #[test]
    fn rejects_garbage_terminal_frame() {
        assert_eq!(parse_terminal_event("nope").unwrap_err().code, "invalid_json");
        assert_eq!(parse_terminal_event("  ").unwrap_err().code, "empty_frame");
    }

    #[test]
    fn unwraps_directory_envelope() {
        let frame = SseFrame::data(
            r#"{"directory":"/repo","payload":{"type":"Session.Status","properties":{"sessionID":"s_1"}}}"#,
        )
        .with_id("12");
        let GlobalFrame::Event(event) = parse_global_frame(&frame).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.event_type, "session.status");
        assert_eq!(event.directory.as_deref(), Some("/repo"));
        assert_eq!(event.seq, Some(12));
        assert_eq!(event.properties["sessionID"], "s_1");
    }

    #[test]
    fn replay_gap_frame_without_id() {
        let frame = SseFrame::data(
            r#"{"type":"opencode-studio:replay-gap","properties":{"scope":"global","requestedLastEventId":4,"seqAtSubscribe":90,"gapSeq":50}}"#,
        )
        .with_event(REPLAY_GAP_EVENT);
        let GlobalFrame::Event(event) = parse_global_frame(&frame).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.event_type, REPLAY_GAP_TYPE);
        assert_eq!(event.seq, None);
        let info = ReplayGapInfo::from_properties(&event.properties);
        assert_eq!(info.requested_last_event_id, Some(4));
        assert_eq!(info.gap_seq, Some(50));
    }

    #[test]
    fn global_heartbeat_event() {
        let frame = SseFrame::heartbeat();
        assert_eq!(parse_global_frame(&frame).unwrap(), GlobalFrame::Heartbeat);

        let with_body = SseFrame::data("{}").with_event(HEARTBEAT_EVENT);
        assert_eq!(parse_global_frame(&with_body).unwrap(), GlobalFrame::Heartbeat);
    }

    #[test]
    fn global_frame_requires_type() {
        let frame = SseFrame::data(r#"{"properties":{}}"#);
        assert_eq!(parse_global_frame(&frame).unwrap_err().code, "missing_type");
    }

    #[test]
    fn parses_ui_state_patch() {
        let event = parse_ui_state_event(
            r#"{"type":"terminal-ui-state.patch","seq":5,"ts":1,"properties":{"ops":[{"type":"state.replace","state":{"version":3,"sessionIds":["t1","t2"]}}]}}"#,
        )
        .unwrap();
        assert_eq!(event.seq(), Some(5));
        let state = event.latest_state().unwrap();
        assert_eq!(state.version, 3);
        assert_eq!(state.session_ids, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn parses_ui_state_snapshot() {
        let event = parse_ui_state_event(
            r#"{"type":"terminal-ui-state.snapshot","state":{"version":9,"activeSessionId":"t1"}}"#,
        )
        .unwrap();
        assert_eq!(event.seq(), None);
        assert_eq!(
            event.latest_state().unwrap().active_session_id.as_deref(),
            Some("t1")
        );
    }
}
