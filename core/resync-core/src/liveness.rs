//! Staleness detection that doesn't rely on any stream's error channel.
//!
//! Browsers and OS sleep can starve network callbacks without ever firing an
//! error, so two independent checks run here:
//!
//! 1. **Clock jump**: a repeating tick measures `now - last_tick`. A delta far
//!    above the tick interval means the process was suspended for about that long.
//! 2. **Chunk age**: a visible, connected stream that received nothing (not even
//!    a heartbeat) for longer than the stall threshold is silently stalled.
//!
//! Jumps observed while hidden are buffered and handed over on the next
//! visibility-restored transition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{add_ms, elapsed_ms};
use crate::config::LivenessConfig;
use crate::stream::StreamStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferedJump {
    pub max_gap_ms: u64,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct LivenessWatchdog {
    config: LivenessConfig,
    last_tick: Option<DateTime<Utc>>,
    buffered: Option<BufferedJump>,
}

impl LivenessWatchdog {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            last_tick: None,
            buffered: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.last_tick = Some(now);
        self.buffered = None;
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_tick
            .map(|at| elapsed_ms(now, at) >= self.config.tick_interval_ms)
            .unwrap_or(true)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.last_tick
            .map(|at| add_ms(at, self.config.tick_interval_ms))
    }

    /// Records a tick. Returns the measured gap when a jump is seen while visible.
    pub fn tick(&mut self, now: DateTime<Utc>, visible: bool) -> Option<u64> {
        let previous = self.last_tick.replace(now)?;
        let delta = elapsed_ms(now, previous);
        if delta <= self.config.clock_jump_threshold_ms {
            return None;
        }

        if visible {
            info!(gap_ms = delta, "Clock jump detected");
            return Some(delta);
        }

        let buffered = self.buffered.get_or_insert(BufferedJump {
            max_gap_ms: 0,
            count: 0,
        });
        buffered.max_gap_ms = buffered.max_gap_ms.max(delta);
        buffered.count += 1;
        debug!(
            gap_ms = delta,
            buffered = buffered.count,
            "Clock jump while hidden; deferring"
        );
        None
    }

    /// Hands over (and clears) any jump seen while the page was hidden.
    pub fn take_buffered(&mut self) -> Option<BufferedJump> {
        self.buffered.take()
    }

    pub fn buffered(&self) -> Option<BufferedJump> {
        self.buffered
    }

    /// Whether a stream with this status and chunk age has silently stalled.
    pub fn is_stalled(&self, status: StreamStatus, chunk_age_ms: Option<u64>, visible: bool) -> bool {
        visible
            && status == StreamStatus::Connected
            && chunk_age_ms
                .map(|age| age > self.config.stall_threshold_ms)
                .unwrap_or(false)
    }
}
