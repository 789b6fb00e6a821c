//! Backoff schedules for retries and status polling.

use std::time::Duration;

use super::config::{PollPolicy, RetryPolicy};

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl PollPolicy {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Interval to wait after a poll that waited `current`.
    pub fn next(&self, current: Duration) -> Duration {
        let next = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next.min(self.max_interval_ms).max(self.initial_interval_ms))
    }
}
