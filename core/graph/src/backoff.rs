//! Linear backoff applied while the remote rate limiter rejects requests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for rate-limit backoff.
///
/// The delay starts at `initial_delay`, grows by `step` on every further
/// rejection and never exceeds `max_delay`. There is no attempt limit.
/// Durations are written as human-readable strings such as `"20s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Growth of the delay per retry.
    #[serde(with = "humantime_serde")]
    pub step: Duration,
    /// Cap for the delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Create a backoff configuration.
    pub fn new(initial_delay: Duration, step: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            step,
            max_delay,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the per-retry increment.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate delay for a given retry number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let grown = self
            .step
            .checked_mul(attempt)
            .and_then(|extra| self.initial_delay.checked_add(extra))
            .unwrap_or(self.max_delay);

        grown.min(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(20),
            Duration::from_secs(20),
            Duration::from_secs(60),
        )
    }
}
