//! Reconnect policy and per-view retry bookkeeping.

use std::time::Duration;

/// Default number of backoff retries before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Default delay before the first backoff retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15);

/// Default delay before the one-shot retry after a forced credential refresh.
pub const DEFAULT_AUTH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How a connection manager retries after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Backoff retries allowed before the view gives up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fixed delay for the forced-refresh retry. Not exponential.
    pub auth_retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            auth_retry_delay: DEFAULT_AUTH_RETRY_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^(attempt - 1), max)` for a 1-based attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether `attempt` is past the allowed number of retries.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

/// Retry counters owned by one connection manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt_count: u32,
    pub auth_retry_used: bool,
}

impl ReconnectState {
    /// Called on every successful open.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let policy = ReconnectPolicy::default();
        let secs: Vec<u64> = (1..=8).map(|a| policy.backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 15, 15, 15, 15]);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff_delay(u32::MAX), DEFAULT_MAX_DELAY);
        assert_eq!(policy.backoff_delay(0), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn exhaustion_is_past_the_limit() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(8));
        assert!(policy.exhausted(9));
    }

    #[test]
    fn reset_clears_both_counters() {
        let mut state = ReconnectState {
            attempt_count: 5,
            auth_retry_used: true,
        };
        state.reset();
        assert_eq!(state, ReconnectState::default());
    }
}
