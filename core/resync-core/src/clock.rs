//! Millisecond arithmetic over wall-clock instants.
//!
//! The core never reads the clock itself; callers pass `now` in. That keeps
//! every timer decision replayable in tests and in the simulator.

use chrono::{DateTime, Duration, Utc};

/// Milliseconds from `since` to `now`, clamped at zero when the clock went backwards.
pub fn elapsed_ms(now: DateTime<Utc>, since: DateTime<Utc>) -> u64 {
    let millis = now.signed_duration_since(since).num_milliseconds();
    u64::try_from(millis).unwrap_or(0)
}

pub fn add_ms(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    let delta = Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000));
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
