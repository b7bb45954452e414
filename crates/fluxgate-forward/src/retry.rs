//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use fluxgate_types::{GatewayError, TargetConfig};

/// Backoff ceiling regardless of configuration.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for one forwarding target.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Jitter factor (0.0 - 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Derive the policy from a target's configuration.
    #[must_use]
    pub fn from_target(config: &TargetConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            base_delay: config.retry_delay(),
            jitter_factor: 0.1,
        }
    }

    /// Delay before retry `attempt` (1-based): exponential from the base,
    /// capped at [`MAX_RETRY_DELAY`], with jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw_ms = self.base_delay.as_millis() as f64 * 2f64.powi(exp as i32);
        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter_factor;
        let capped = (raw_ms * jitter).min(MAX_RETRY_DELAY.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Whether another retry is allowed for this error at this attempt count.
    #[must_use]
    pub fn should_retry(&self, error: &GatewayError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}
