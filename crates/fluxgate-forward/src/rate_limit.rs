//! Per-rule token-bucket pacing.
//!
//! Each rule id gets its own bucket sized by the rule's
//! [`RateLimitSpec`]: `burst` tokens of capacity refilled at
//! `requests_per_second`. A depleted bucket holds the send until a token
//! accrues, unless that wait would exceed the caller's budget, in which
//! case the event is dropped with a reason.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use fluxgate_types::RateLimitSpec;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome when a send cannot be paced within its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// How long the caller would have had to wait.
    pub required_wait_ms: u64,
}

/// Token buckets keyed by rule id.
#[derive(Debug, Default)]
pub struct RuleRateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RuleRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one token for `rule_id`, waiting at most `max_wait`.
    ///
    /// Returns immediately while burst capacity lasts; afterwards sends pace
    /// at the configured rate.
    pub async fn acquire(
        &self,
        rule_id: &str,
        spec: RateLimitSpec,
        max_wait: Duration,
    ) -> Result<(), RateLimited> {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire(rule_id, spec) {
                None => return Ok(()),
                Some(wait) => {
                    if waited + wait > max_wait {
                        return Err(RateLimited {
                            required_wait_ms: (waited + wait).as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Try to consume a token now. `None` on success; otherwise the wait
    /// until one token accrues.
    pub fn try_acquire(&self, rule_id: &str, spec: RateLimitSpec) -> Option<Duration> {
        let capacity = f64::from(spec.burst.max(1));
        let rate = spec.requests_per_second.max(f64::MIN_POSITIVE);
        let now = Instant::now();

        let mut entry = self
            .buckets
            .entry(rule_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });
        let bucket = entry.value_mut();

        let elapsed = now.duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let needed = (1.0 - bucket.tokens) / rate;
            Some(Duration::from_secs_f64(needed))
        }
    }

}
