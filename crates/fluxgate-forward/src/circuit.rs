//! Per-target circuit breaker.
//!
//! States: `active -> degraded -> open -> probing -> active`. Consecutive
//! failures drive `active` through `degraded` to `open`; while open, sends
//! fast-drop until the cool-down elapses, after which exactly one in-flight
//! probe decides between closing (`active`) and re-opening.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Circuit thresholds and timing.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures that mark the target degraded.
    pub degraded_threshold: u32,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is admitted.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: 3,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Delivering normally.
    Active,
    /// Accumulating failures but still delivering.
    Degraded,
    /// Fast-dropping sends.
    Open,
    /// One probe in flight.
    Probing,
}

/// What the circuit allows for the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Deliver normally.
    Allow,
    /// Deliver as the single recovery probe (no retries).
    Probe,
    /// Drop without attempting delivery.
    FastDrop,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// The breaker guarding one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Active,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Decide admission for the next send, transitioning `open -> probing`
    /// when the cool-down has elapsed.
    pub fn admission(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Active | CircuitState::Degraded => Admission::Allow,
            CircuitState::Probing => Admission::FastDrop,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    inner.state = CircuitState::Probing;
                    Admission::Probe
                } else {
                    Admission::FastDrop
                }
            }
        }
    }

    /// Record a successful delivery or probe; closes the circuit.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Active;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed delivery or probe.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            // A failed probe re-opens for a fresh cool-down.
            CircuitState::Probing => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
            CircuitState::Active | CircuitState::Degraded => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                } else if inner.consecutive_failures >= self.config.degraded_threshold {
                    inner.state = CircuitState::Degraded;
                }
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            degraded_threshold: 2,
            failure_threshold: 3,
            cooldown,
        })
    }

    #[test]
    fn opens_on_exactly_n_consecutive_failures() {
        let breaker = breaker(Duration::from_secs(60));
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Active);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Degraded);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.admission(), Admission::FastDrop);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = breaker(Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Active);
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Degraded);
    }

    #[test]
    fn cooldown_admits_exactly_one_probe() {
        let breaker = breaker(Duration::ZERO);
        for _ in 0..3 {
            breaker.on_failure();
        }
        assert_eq!(breaker.admission(), Admission::Probe);
        assert_eq!(breaker.state(), CircuitState::Probing);
        // A second send during the probe fast-drops.
        assert_eq!(breaker.admission(), Admission::FastDrop);
    }

    #[test]
    fn single_successful_probe_closes() {
        let breaker = breaker(Duration::ZERO);
        for _ in 0..3 {
            breaker.on_failure();
        }
        assert_eq!(breaker.admission(), Admission::Probe);
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Active);
        assert_eq!(breaker.admission(), Admission::Allow);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = breaker(Duration::from_millis(50));
        for _ in 0..3 {
            breaker.on_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.admission(), Admission::Probe);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        // Fresh cool-down: immediately fast-drops again.
        assert_eq!(breaker.admission(), Admission::FastDrop);
    }
}
