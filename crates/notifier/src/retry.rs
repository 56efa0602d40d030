//! Retry policy: decides backoff delays between delivery attempts.
//!
//! The store only persists the decision (`next_retry_at`); the policy lives
//! with the dispatcher.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Growth factor per additional failure.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failures (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    ///
    /// With the defaults: 30s, 60s, 120s, ... up to one hour.
    pub fn next_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).max(0);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs >= max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Absolute time of the next attempt, in epoch milliseconds.
    pub fn next_retry_at(&self, now: i64, attempts: i32) -> i64 {
        let delay_ms = i64::try_from(self.next_delay(attempts).as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay_ms)
    }
}
