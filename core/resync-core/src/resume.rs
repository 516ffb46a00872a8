//! Resume policy: decides what to do when the app may have been away.
//!
//! All browser/runtime lifecycle events are funneled through one
//! [`ResumeSignal`] type and a single [`AppResumeCoordinator::ingest`] call,
//! which keeps the decision logic free of any DOM coupling.
//!
//! ```text
//! visibility/focus/online/pageshow/resume/clock-jump ──► ingest ──► Resync(plan) | Debounced | Ignored
//! pagehide/freeze ─────────────────────────────────────► ingest ──► Suspend
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::elapsed_ms;
use crate::config::{PaginationConfig, ResumeConfig};
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ResumeSignal {
    Visibility { visible: bool },
    Focus,
    Blur,
    Online,
    PageShow { persisted: bool },
    PageHide { persisted: bool },
    Freeze,
    Resume,
    ClockJump { gap_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeReason {
    Visible,
    Focus,
    Online,
    PageShow,
    Resume,
    ClockJump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    PageHide { persisted: bool },
    Freeze,
}

/// Facts owned by other components, read as a snapshot at ingest time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeContext {
    /// Oldest "time since last chunk" across live streams.
    pub max_chunk_age_ms: Option<u64>,
    pub expanded_directories: usize,
    pub has_global_stream: bool,
    /// Largest clock jump buffered by the watchdog while hidden.
    pub buffered_jump_ms: Option<u64>,
}

/// Volatile state the host should refetch over REST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefetchPlan {
    pub settings: bool,
    pub session_messages: bool,
    pub activity: bool,
    pub lists: bool,
    pub page_size: usize,
}

impl RefetchPlan {
    pub fn everything(page_size: usize) -> Self {
        Self {
            settings: true,
            session_messages: true,
            activity: true,
            lists: true,
            page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResumePlan {
    pub reason: ResumeReason,
    pub gap_ms: u64,
    pub force_reconnect: bool,
    pub reconnect_global: bool,
    pub refetch: RefetchPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResumeDecision {
    Ignored,
    Debounced,
    Suspend { reason: SuspendReason },
    Resync(ResumePlan),
}

#[derive(Debug, Clone)]
pub struct AppResumeCoordinator {
    config: ResumeConfig,
    pagination: PaginationConfig,
    visible: bool,
    hidden_at: Option<DateTime<Utc>>,
    throttle: Throttle,
}

impl AppResumeCoordinator {
    pub fn new(config: ResumeConfig, pagination: PaginationConfig) -> Self {
        let throttle = Throttle::leading(config.resync_min_spacing_ms);
        Self {
            config,
            pagination,
            visible: true,
            hidden_at: None,
            throttle,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn hidden_at(&self) -> Option<DateTime<Utc>> {
        self.hidden_at
    }

    pub fn ingest(
        &mut self,
        signal: ResumeSignal,
        now: DateTime<Utc>,
        context: ResumeContext,
    ) -> ResumeDecision {
        match signal {
            ResumeSignal::Visibility { visible: false } => {
                self.mark_hidden(now);
                ResumeDecision::Ignored
            }
            ResumeSignal::Visibility { visible: true } => {
                let hidden_gap = self.mark_visible(now);
                let gap = hidden_gap.max(context.buffered_jump_ms.unwrap_or(0));
                self.resync(ResumeReason::Visible, gap, now, context)
            }
            ResumeSignal::Blur => ResumeDecision::Ignored,
            ResumeSignal::Focus => {
                let gap = if self.visible { 0 } else { self.mark_visible(now) };
                self.resync(ResumeReason::Focus, gap, now, context)
            }
            ResumeSignal::Online => {
                let gap = self.hidden_gap(now);
                self.resync(ResumeReason::Online, gap, now, context)
            }
            ResumeSignal::PageShow { .. } => {
                let gap = self.mark_visible(now);
                self.resync(ResumeReason::PageShow, gap, now, context)
            }
            ResumeSignal::Resume => {
                let gap = self.mark_visible(now);
                self.resync(ResumeReason::Resume, gap, now, context)
            }
            ResumeSignal::ClockJump { gap_ms } => {
                self.resync(ResumeReason::ClockJump, gap_ms, now, context)
            }
            ResumeSignal::PageHide { persisted } => {
                self.mark_hidden(now);
                info!(persisted, "Page hidden for lifecycle; closing live streams");
                ResumeDecision::Suspend {
                    reason: SuspendReason::PageHide { persisted },
                }
            }
            ResumeSignal::Freeze => {
                self.mark_hidden(now);
                info!("Page frozen; closing live streams");
                ResumeDecision::Suspend {
                    reason: SuspendReason::Freeze,
                }
            }
        }
    }

    /// Whether this resume must tear down and reopen streams.
    pub fn should_force_reconnect(
        &self,
        reason: ResumeReason,
        gap_ms: u64,
        context: &ResumeContext,
    ) -> bool {
        if gap_ms >= self.config.force_reconnect_gap_ms {
            return true;
        }
        if self.visible
            && context
                .max_chunk_age_ms
                .map(|age| age >= self.config.stale_chunk_age_ms)
                .unwrap_or(false)
        {
            return true;
        }
        // Serialized/frozen pages keep no live sockets.
        matches!(reason, ResumeReason::PageShow | ResumeReason::Resume)
    }

    pub fn page_size(&self, gap_ms: u64, expanded_directories: usize) -> usize {
        self.pagination
            .page_size(gap_ms, expanded_directories, self.visible)
    }

    fn resync(
        &mut self,
        reason: ResumeReason,
        gap_ms: u64,
        now: DateTime<Utc>,
        context: ResumeContext,
    ) -> ResumeDecision {
        if !self.throttle.request(now) {
            debug!(reason = ?reason, gap_ms, "Resume signal collapsed into recent resync");
            return ResumeDecision::Debounced;
        }

        let force_reconnect = self.should_force_reconnect(reason, gap_ms, &context);
        let page_size = self.page_size(gap_ms, context.expanded_directories);
        let plan = ResumePlan {
            reason,
            gap_ms,
            force_reconnect,
            reconnect_global: force_reconnect || !context.has_global_stream,
            refetch: RefetchPlan::everything(page_size),
        };
        info!(
            reason = ?reason,
            gap_ms,
            force_reconnect,
            page_size,
            "Resume resync"
        );
        ResumeDecision::Resync(plan)
    }

    fn mark_hidden(&mut self, now: DateTime<Utc>) {
        self.visible = false;
        if self.hidden_at.is_none() {
            self.hidden_at = Some(now);
        }
    }

    fn mark_visible(&mut self, now: DateTime<Utc>) -> u64 {
        self.visible = true;
        self.hidden_at
            .take()
            .map(|at| elapsed_ms(now, at))
            .unwrap_or(0)
    }

    fn hidden_gap(&self, now: DateTime<Utc>) -> u64 {
        self.hidden_at.map(|at| elapsed_ms(now, at)).unwrap_or(0)
    }
}
