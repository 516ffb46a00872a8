//! Integration tests for terminal session tracking, cleanup, and probing.

use chrono::{DateTime, Duration, Utc};
use resync_core::{
    EngineEvent, ProbeResult, RecordingTransport, StreamKey, StreamOutcome, StreamStatus,
    SyncConfig, SyncEngine, TerminalOutcome, TransportCall,
};
use resync_protocol::SseFrame;

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn ms(offset: i64) -> DateTime<Utc> {
    t0() + Duration::milliseconds(offset)
}

fn ui_snapshot(version: u64, ids: &[&str]) -> SseFrame {
    SseFrame::data(
        serde_json::json!({
            "type": "terminal-ui-state.snapshot",
            "state": { "version": version, "sessionIds": ids }
        })
        .to_string(),
    )
}

fn ui_patch(seq: u64, version: u64, ids: &[&str]) -> SseFrame {
    SseFrame::data(
        serde_json::json!({
            "type": "terminal-ui-state.patch",
            "seq": seq,
            "ts": 0,
            "properties": {
                "ops": [{ "type": "state.replace", "state": { "version": version, "sessionIds": ids } }]
            }
        })
        .to_string(),
    )
    .with_id(seq.to_string())
}

fn output(seq: u64, data: &str) -> SseFrame {
    SseFrame::data(serde_json::json!({ "type": "data", "seq": seq, "data": data }).to_string())
}

fn terminal_key(id: &str) -> StreamKey {
    StreamKey::Terminal(id.to_string())
}

fn engine_with_sessions(ids: &[&str]) -> (SyncEngine, RecordingTransport) {
    let mut engine = SyncEngine::new(SyncConfig::default());
    let mut transport = RecordingTransport::new();
    engine.start(t0(), &mut transport);
    let generation = engine.generation(&StreamKey::UiState).unwrap();
    engine
        .on_ui_state_frame(generation, &ui_snapshot(1, ids), t0(), &mut transport)
        .unwrap();
    (engine, transport)
}

#[test]
fn test_ui_state_snapshot_opens_terminal_streams() {
    let (engine, transport) = engine_with_sessions(&["t1", "t2"]);
    assert_eq!(
        engine.terminals().tracked_ids(),
        vec!["t1".to_string(), "t2".to_string()]
    );
    assert!(transport.last_open_for(&terminal_key("t1")).is_some());
    assert!(transport.last_open_for(&terminal_key("t2")).is_some());
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Connecting));
}

#[test]
fn test_terminal_output_repaints_from_buffer() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    let generation = engine.generation(&terminal_key("t1")).unwrap();

    for (seq, chunk) in [(1, "$ echo hi\r\n"), (2, "hi\r\n"), (2, "hi\r\n")] {
        engine
            .on_terminal_frame("t1", generation, &output(seq, chunk), ms(10), &mut transport)
            .unwrap();
    }

    assert_eq!(
        engine.terminals().snapshot("t1").as_deref(),
        Some("$ echo hi\r\nhi\r\n")
    );
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Connected));
    assert_eq!(engine.terminals().slot("t1").unwrap().state().cursor, 2);
}

#[test]
fn test_removed_session_is_recreated_clean() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1", "t2"]);
    let ui_generation = engine.generation(&StreamKey::UiState).unwrap();
    let generation = engine.generation(&terminal_key("t1")).unwrap();

    engine
        .on_terminal_frame("t1", generation, &output(40, "data"), ms(10), &mut transport)
        .unwrap();
    engine.on_terminal_error("t1", generation, "reset", ms(20), &mut transport);
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Reconnecting));

    let events = engine
        .on_ui_state_frame(ui_generation, &ui_patch(2, 2, &["t2"]), ms(30), &mut transport)
        .unwrap();
    assert!(events.contains(&EngineEvent::SessionsRemoved {
        session_ids: vec!["t1".to_string()]
    }));
    assert!(!engine.terminals().is_tracked("t1"));
    assert!(engine.terminals().snapshot("t1").is_none());

    // A late callback for the removed session changes nothing.
    let late = engine
        .on_terminal_frame("t1", generation, &output(41, "late"), ms(40), &mut transport)
        .unwrap();
    assert_eq!(
        late,
        vec![EngineEvent::Terminal {
            session_id: "t1".to_string(),
            outcome: TerminalOutcome::Untracked
        }]
    );

    engine
        .on_ui_state_frame(ui_generation, &ui_patch(3, 3, &["t1", "t2"]), ms(50), &mut transport)
        .unwrap();
    let summary = engine
        .terminals()
        .summaries()
        .into_iter()
        .find(|summary| summary.session_id == "t1")
        .unwrap();
    assert_eq!(summary.cursor, 0);
    assert_eq!(summary.reconnect_attempts, 0);
    assert!(!summary.manually_disconnected);
    assert_eq!(summary.buffered_bytes, 0);
    assert_eq!(summary.status, StreamStatus::Connecting);
    assert_eq!(
        transport.last_open_for(&terminal_key("t1")).unwrap().resume_from,
        None
    );
}

#[test]
fn test_probe_negative_removes_session_instead_of_retrying() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    let generation = engine.generation(&terminal_key("t1")).unwrap();
    engine.on_terminal_error("t1", generation, "refused", ms(0), &mut transport);

    let events = engine.tick(ms(600), &mut transport);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Terminal {
            outcome: TerminalOutcome::Stream {
                outcome: StreamOutcome::Reopened { .. }
            },
            ..
        }
    )));

    let generation = engine.generation(&terminal_key("t1")).unwrap();
    engine.on_terminal_error("t1", generation, "refused", ms(600), &mut transport);
    engine.tick(ms(1_800), &mut transport);
    assert_eq!(
        transport.calls().last(),
        Some(&TransportCall::Probe {
            key: terminal_key("t1"),
            generation
        })
    );

    let events = engine.probe_completed(
        &terminal_key("t1"),
        generation,
        ProbeResult::Gone,
        ms(1_900),
        &mut transport,
    );
    assert!(events.contains(&EngineEvent::SessionsRemoved {
        session_ids: vec!["t1".to_string()]
    }));
    assert!(engine.terminals().is_empty());
    assert!(engine.terminals().next_deadline().is_none());
}

#[test]
fn test_probe_positive_reopens_with_cursor() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    let generation = engine.generation(&terminal_key("t1")).unwrap();
    engine
        .on_terminal_frame("t1", generation, &output(8, "x"), ms(0), &mut transport)
        .unwrap();
    engine.on_terminal_error("t1", generation, "refused", ms(0), &mut transport);
    engine.tick(ms(600), &mut transport);
    let generation = engine.generation(&terminal_key("t1")).unwrap();
    engine.on_terminal_error("t1", generation, "refused", ms(600), &mut transport);
    engine.tick(ms(1_800), &mut transport);

    engine.probe_completed(
        &terminal_key("t1"),
        generation,
        ProbeResult::Exists,
        ms(1_900),
        &mut transport,
    );
    assert_eq!(engine.generation(&terminal_key("t1")), Some(generation + 1));
    assert_eq!(
        transport.last_open_for(&terminal_key("t1")).unwrap().resume_from,
        Some(8)
    );
}

#[test]
fn test_exited_session_stays_closed_through_resume() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    let generation = engine.generation(&terminal_key("t1")).unwrap();
    let exit = SseFrame::data(r#"{"type":"exit","exitCode":0,"signal":null}"#);
    let events = engine
        .on_terminal_frame("t1", generation, &exit, ms(0), &mut transport)
        .unwrap();
    assert!(matches!(
        &events[0],
        EngineEvent::Terminal {
            outcome: TerminalOutcome::Exited { .. },
            ..
        }
    ));

    engine.on_signal(resync_core::ResumeSignal::Resume, ms(5_000), &mut transport);
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Exited));
    assert_eq!(engine.generation(&terminal_key("t1")), Some(generation));
}

#[test]
fn test_manual_terminal_disconnect_blocks_auto_reconnect() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    assert!(engine.disconnect_terminal("t1", &mut transport).unwrap());
    assert!(!engine.disconnect_terminal("t1", &mut transport).unwrap());

    engine.on_signal(resync_core::ResumeSignal::PageShow { persisted: true }, ms(5_000), &mut transport);
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Disconnected));

    engine.connect_terminal("t1", ms(6_000), &mut transport);
    assert_eq!(engine.terminals().status("t1"), Some(StreamStatus::Connecting));
}

#[test]
fn test_history_gap_resets_buffer_and_keeps_stream() {
    let (mut engine, mut transport) = engine_with_sessions(&["t1"]);
    let generation = engine.generation(&terminal_key("t1")).unwrap();
    engine
        .on_terminal_frame("t1", generation, &output(3, "old"), ms(0), &mut transport)
        .unwrap();

    let resync = SseFrame::data(
        r#"{"type":"resync","reason":"history_gap","since":3,"firstAvailableSeq":120,"lastSeq":180}"#,
    );
    engine
        .on_terminal_frame("t1", generation, &resync, ms(5), &mut transport)
        .unwrap();
    engine
        .on_terminal_frame("t1", generation, &output(120, "new"), ms(6), &mut transport)
        .unwrap();

    assert_eq!(engine.terminals().snapshot("t1").as_deref(), Some("new"));
    assert_eq!(engine.generation(&terminal_key("t1")), Some(generation));
    let state = engine.terminals().slot("t1").unwrap().state();
    assert_eq!(state.last_gap.as_ref().unwrap().first_available_seq, Some(120));
}
