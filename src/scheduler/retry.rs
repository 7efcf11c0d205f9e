//! Retry policy: decides whether and when a failed job runs again.

use std::time::Duration;

/// Exponential backoff policy for failed jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied per further retry.
    pub backoff_factor: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
            max_delay,
        }
    }

    /// Whether another attempt is allowed after `attempts` runs have failed.
    ///
    /// `max_retries = 2` allows three attempts in total.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Delay before the next attempt, given the attempts made so far (1-indexed).
    ///
    /// delay = min(initial_delay * backoff_factor^(attempts - 1), max_delay)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
