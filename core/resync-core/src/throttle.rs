//! Minimum-spacing gate for resync entry points.
//!
//! Bursts of triggers inside the spacing window collapse into the run that
//! already happened. With `trailing` enabled, one deferred run is armed and
//! released by [`Throttle::poll`] once the window closes, so the last trigger
//! of a burst is never lost.

use chrono::{DateTime, Utc};

use crate::clock::{add_ms, elapsed_ms};

#[derive(Debug, Clone)]
pub struct Throttle {
    min_spacing_ms: u64,
    trailing: bool,
    last_run_at: Option<DateTime<Utc>>,
    deferred: bool,
}

impl Throttle {
    pub fn leading(min_spacing_ms: u64) -> Self {
        Self {
            min_spacing_ms,
            trailing: false,
            last_run_at: None,
            deferred: false,
        }
    }

    pub fn with_trailing(min_spacing_ms: u64) -> Self {
        Self {
            trailing: true,
            ..Self::leading(min_spacing_ms)
        }
    }

    /// Returns true when the caller should run now.
    pub fn request(&mut self, now: DateTime<Utc>) -> bool {
        if self.window_open(now) {
            self.last_run_at = Some(now);
            self.deferred = false;
            return true;
        }
        if self.trailing {
            self.deferred = true;
        }
        false
    }

    /// Releases a deferred run once the spacing window has elapsed.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if !self.deferred || !self.window_open(now) {
            return false;
        }
        self.deferred = false;
        self.last_run_at = Some(now);
        true
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.deferred {
            return None;
        }
        self.last_run_at.map(|at| add_ms(at, self.min_spacing_ms))
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    fn window_open(&self, now: DateTime<Utc>) -> bool {
        self.last_run_at
            .map(|at| now < at || elapsed_ms(now, at) >= self.min_spacing_ms)
            .unwrap_or(true)
    }
}
