//! Dispatch of global stream events to the subsystems that care about them.
//!
//! The router never touches the stream itself: the engine feeds it decoded
//! events that already passed the generation check. Control events come back
//! as explicit outcomes so the engine can turn them into resync work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use resync_protocol::{
    parse_ui_state_value, GlobalEvent, ReplayGapInfo, UiStateEvent, REPLAY_GAP_TYPE,
    UPSTREAM_DISCONNECTED_TYPE,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::stream::StreamKey;
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Settings,
    Chat,
    Activity,
    Directory,
    TerminalUiState,
    Control,
}

/// Maps a normalized (trimmed, lowercased) event type to its subsystem.
pub fn subsystem_for(event_type: &str) -> Option<Subsystem> {
    match event_type {
        REPLAY_GAP_TYPE | UPSTREAM_DISCONNECTED_TYPE => Some(Subsystem::Control),
        "session.status" | "session.idle" => Some(Subsystem::Activity),
        "session.updated" | "session.deleted" | "session.created" | "session.error" => {
            Some(Subsystem::Chat)
        }
        t if t.starts_with("config.settings.") => Some(Subsystem::Settings),
        t if t.starts_with("message.") => Some(Subsystem::Chat),
        t if t.starts_with("directoryentry.")
            || t.starts_with("sessionsummary.")
            || t.starts_with("sessionruntime.") =>
        {
            Some(Subsystem::Directory)
        }
        t if t.starts_with("terminal-ui-state.") => Some(Subsystem::TerminalUiState),
        _ => None,
    }
}

/// A consumer of routed global events. Delivery is synchronous.
pub trait GlobalEventSink {
    fn deliver(&mut self, subsystem: Subsystem, event: &GlobalEvent);
}

struct Subscription {
    subsystems: Vec<Subsystem>,
    sink: Box<dyn GlobalEventSink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RouteOutcome {
    Delivered {
        subsystem: Subsystem,
        event_type: String,
        sinks: usize,
        /// A directory change asked for a list refresh and the throttle let it through.
        refresh_lists: bool,
    },
    Unrouted {
        event_type: String,
    },
    /// Server could not replay from our last event id; data must be refetched.
    ReplayGap { gap: ReplayGapInfo },
    /// Server lost its upstream. The downstream stream stays open.
    UpstreamDisconnected { reason: Option<String> },
    UiState { event: UiStateEvent },
}

/// Debug diagnostics only; never surfaced as user-facing errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub routed: BTreeMap<Subsystem, u64>,
    pub unrouted: u64,
    pub gaps: u64,
    pub last_gap_at: Option<DateTime<Utc>>,
    pub upstream_disconnects: u64,
    pub last_upstream_disconnect_reason: Option<String>,
}

pub struct GlobalEventRouter {
    subscriptions: Vec<Subscription>,
    list_refresh: Throttle,
    stats: RouterStats,
}

impl GlobalEventRouter {
    pub fn new(list_refresh_min_spacing_ms: u64) -> Self {
        Self {
            subscriptions: Vec::new(),
            list_refresh: Throttle::with_trailing(list_refresh_min_spacing_ms),
            stats: RouterStats::default(),
        }
    }

    pub fn subscribe(&mut self, subsystems: &[Subsystem], sink: Box<dyn GlobalEventSink>) {
        self.subscriptions.push(Subscription {
            subsystems: subsystems.to_vec(),
            sink,
        });
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn route(&mut self, event: &GlobalEvent, now: DateTime<Utc>) -> Result<RouteOutcome> {
        let Some(subsystem) = subsystem_for(&event.event_type) else {
            self.stats.unrouted += 1;
            debug!(event_type = %event.event_type, "No subsystem for global event");
            return Ok(RouteOutcome::Unrouted {
                event_type: event.event_type.clone(),
            });
        };

        let sinks = self.deliver(subsystem, event);
        *self.stats.routed.entry(subsystem).or_insert(0) += 1;

        match subsystem {
            Subsystem::Control if event.event_type == REPLAY_GAP_TYPE => {
                let gap = ReplayGapInfo::from_properties(&event.properties);
                self.stats.gaps += 1;
                self.stats.last_gap_at = Some(now);
                info!(
                    requested_last_event_id = ?gap.requested_last_event_id,
                    gap_seq = ?gap.gap_seq,
                    "Global stream replay gap"
                );
                Ok(RouteOutcome::ReplayGap { gap })
            }
            Subsystem::Control => {
                let reason = event
                    .properties
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                self.stats.upstream_disconnects += 1;
                self.stats.last_upstream_disconnect_reason = reason.clone();
                debug!(reason = ?reason, "Server reported upstream disconnect");
                Ok(RouteOutcome::UpstreamDisconnected { reason })
            }
            Subsystem::TerminalUiState => {
                let event = parse_ui_state_value(&event.payload).map_err(|info| {
                    warn!(code = %info.code, "Malformed UI-state event on global stream");
                    SyncError::InvalidFrame {
                        stream: StreamKey::Global.to_string(),
                        info,
                    }
                })?;
                Ok(RouteOutcome::UiState { event })
            }
            _ => {
                let refresh_lists =
                    subsystem == Subsystem::Directory && self.list_refresh.request(now);
                Ok(RouteOutcome::Delivered {
                    subsystem,
                    event_type: event.event_type.clone(),
                    sinks,
                    refresh_lists,
                })
            }
        }
    }

    /// Releases a list refresh deferred by the throttle.
    pub fn poll_list_refresh(&mut self, now: DateTime<Utc>) -> bool {
        self.list_refresh.poll(now)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.list_refresh.next_deadline()
    }

    fn deliver(&mut self, subsystem: Subsystem, event: &GlobalEvent) -> usize {
        let mut delivered = 0;
        for subscription in self
            .subscriptions
            .iter_mut()
            .filter(|subscription| subscription.subsystems.contains(&subsystem))
        {
            subscription.sink.deliver(subsystem, event);
            delivered += 1;
        }
        delivered
    }
}

impl std::fmt::Debug for GlobalEventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalEventRouter")
            .field("subscriptions", &self.subscriptions.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use resync_protocol::{parse_global_frame, GlobalFrame, SseFrame};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn event(json: &str) -> GlobalEvent {
        match parse_global_frame(&SseFrame::data(json)).unwrap() {
            GlobalFrame::Event(event) => event,
            GlobalFrame::Heartbeat => panic!("expected event"),
        }
    }

    #[derive(Clone, Default)]
    struct Collector(Rc<RefCell<Vec<(Subsystem, String)>>>);

    impl GlobalEventSink for Collector {
        fn deliver(&mut self, subsystem: Subsystem, event: &GlobalEvent) {
            self.0
                .borrow_mut()
                .push((subsystem, event.event_type.clone()));
        }
    }

    #[test]
    fn test_subsystem_table() {
        assert_eq!(subsystem_for("config.settings.replace"), Some(Subsystem::Settings));
        assert_eq!(subsystem_for("message.part.updated"), Some(Subsystem::Chat));
        assert_eq!(subsystem_for("session.deleted"), Some(Subsystem::Chat));
        assert_eq!(subsystem_for("session.status"), Some(Subsystem::Activity));
        assert_eq!(subsystem_for("sessionsummary.upsert"), Some(Subsystem::Directory));
        assert_eq!(subsystem_for("directoryentry.remove"), Some(Subsystem::Directory));
        assert_eq!(
            subsystem_for("terminal-ui-state.patch"),
            Some(Subsystem::TerminalUiState)
        );
        assert_eq!(subsystem_for(REPLAY_GAP_TYPE), Some(Subsystem::Control));
        assert_eq!(subsystem_for("lsp.updated"), None);
    }

    #[test]
    fn delivers_only_to_subscribed_sinks() {
        let chat = Collector::default();
        let settings = Collector::default();
        let mut router = GlobalEventRouter::new(250);
        router.subscribe(&[Subsystem::Chat], Box::new(chat.clone()));
        router.subscribe(&[Subsystem::Settings], Box::new(settings.clone()));

        let outcome = router
            .route(&event(r#"{"type":"Message.Updated","properties":{}}"#), t0())
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered { sinks: 1, .. }));
        assert_eq!(
            chat.0.borrow().as_slice(),
            &[(Subsystem::Chat, "message.updated".to_string())]
        );
        assert!(settings.0.borrow().is_empty());
        assert_eq!(router.stats().routed.get(&Subsystem::Chat), Some(&1));
    }

    #[test]
    fn wrapped_payload_routes_by_inner_type() {
        let mut router = GlobalEventRouter::new(250);
        let outcome = router
            .route(
                &event(r#"{"directory":"/repo","payload":{"type":"session.idle","properties":{}}}"#),
                t0(),
            )
            .unwrap();
        assert!(matches!(
            outcome,
            RouteOutcome::Delivered {
                subsystem: Subsystem::Activity,
                ..
            }
        ));
    }

    #[test]
    fn directory_events_share_a_trailing_refresh() {
        let mut router = GlobalEventRouter::new(250);
        let directory = event(r#"{"type":"sessionSummary.upsert","properties":{}}"#);

        let first = router.route(&directory, t0()).unwrap();
        assert!(matches!(first, RouteOutcome::Delivered { refresh_lists: true, .. }));
        for offset in [10, 20, 30] {
            let burst = router
                .route(&directory, t0() + Duration::milliseconds(offset))
                .unwrap();
            assert!(matches!(burst, RouteOutcome::Delivered { refresh_lists: false, .. }));
        }
        assert!(!router.poll_list_refresh(t0() + Duration::milliseconds(100)));
        assert!(router.poll_list_refresh(t0() + Duration::milliseconds(250)));
        assert!(!router.poll_list_refresh(t0() + Duration::milliseconds(900)));
    }

    #[test]
    fn replay_gap_is_counted() {
        let mut router = GlobalEventRouter::new(250);
        let frame = SseFrame::data(
            r#"{"type":"opencode-studio:replay-gap","properties":{"requestedLastEventId":4,"seqAtSubscribe":90,"gapSeq":50}}"#,
        )
        .with_event("replay-gap");
        let GlobalFrame::Event(gap_event) = parse_global_frame(&frame).unwrap() else {
            panic!("expected event");
        };

        let outcome = router.route(&gap_event, t0()).unwrap();
        let RouteOutcome::ReplayGap { gap } = outcome else {
            panic!("expected replay gap, got {:?}", outcome);
        };
        assert_eq!(gap.gap_seq, Some(50));
        assert_eq!(router.stats().gaps, 1);
        assert_eq!(router.stats().last_gap_at, Some(t0()));
    }

    #[test]
    fn upstream_disconnect_is_recorded() {
        let mut router = GlobalEventRouter::new(250);
        let outcome = router
            .route(
                &event(r#"{"type":"opencode-studio:upstream-disconnected","properties":{"reason":"eof"}}"#),
                t0(),
            )
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::UpstreamDisconnected {
                reason: Some("eof".into())
            }
        );
        assert_eq!(router.stats().upstream_disconnects, 1);
    }

    #[test]
    fn ui_state_events_are_decoded() {
        let mut router = GlobalEventRouter::new(250);
        let outcome = router
            .route(
                &event(r#"{"type":"terminal-ui-state.snapshot","state":{"version":2,"sessionIds":["t1"]}}"#),
                t0(),
            )
            .unwrap();
        let RouteOutcome::UiState { event } = outcome else {
            panic!("expected ui state");
        };
        assert_eq!(event.latest_state().unwrap().version, 2);
    }

    #[test]
    fn unknown_types_are_unrouted() {
        let mut router = GlobalEventRouter::new(250);
        let outcome = router
            .route(&event(r#"{"type":"pty.created"}"#), t0())
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Unrouted { .. }));
        assert_eq!(router.stats().unrouted, 1);
    }
}
