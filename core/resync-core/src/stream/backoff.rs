use std::cmp;

use crate::config::BackoffConfig;

/// Exponential reconnect delay: `min(cap, base * 2^attempt)`.
///
/// The attempt counter saturates at `max_attempts`; retries continue at the
/// capped delay once it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_ms: u64,
    cap_ms: u64,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            cap_ms,
            max_attempts,
        }
    }

    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = cmp::min(attempt, self.max_attempts);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        cmp::min(self.cap_ms, self.base_ms.saturating_mul(factor))
    }

    pub fn next_attempt(&self, attempts: u32) -> u32 {
        cmp::min(attempts.saturating_add(1), self.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.base_ms, config.cap_ms, config.max_attempts)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}
