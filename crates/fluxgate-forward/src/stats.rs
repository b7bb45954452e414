//! Per-target delivery accounting.
//!
//! Counters are atomics on the hot path; `in_flight` is derived at snapshot
//! time as `received - forwarded - failed - dropped`, so the accounting
//! identity holds by construction.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::circuit::CircuitState;

/// Hot-path counters for one target.
#[derive(Debug, Default)]
pub struct TargetCounters {
    /// Rule-matched events handed to this target.
    pub received: AtomicU64,
    /// Successful deliveries.
    pub forwarded: AtomicU64,
    /// Deliveries that exhausted retries or failed permanently.
    pub failed: AtomicU64,
    /// Events dropped before delivery (queue full, rate limited, circuit
    /// open).
    pub dropped: AtomicU64,
    /// Retry attempts.
    pub retried: AtomicU64,
}

impl TargetCounters {
    pub(crate) fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Snapshot of one target's delivery state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetStats {
    /// Target id.
    pub target_id: String,
    /// Circuit state at snapshot time.
    pub state: CircuitState,
    /// Rule-matched events handed to this target.
    pub received: u64,
    /// Successful deliveries.
    pub forwarded: u64,
    /// Permanent failures.
    pub failed: u64,
    /// Dropped before delivery.
    pub dropped: u64,
    /// Retry attempts.
    pub retried: u64,
    /// Queued or mid-delivery right now.
    pub in_flight: u64,
}

impl TargetStats {
    pub(crate) fn snapshot(
        target_id: &str,
        state: CircuitState,
        counters: &TargetCounters,
    ) -> Self {
        let received = counters.received.load(Ordering::Relaxed);
        let forwarded = counters.forwarded.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let dropped = counters.dropped.load(Ordering::Relaxed);
        Self {
            target_id: target_id.to_string(),
            state,
            received,
            forwarded,
            failed,
            dropped,
            retried: counters.retried.load(Ordering::Relaxed),
            in_flight: received.saturating_sub(forwarded + failed + dropped),
        }
    }
}

/// Engine-wide snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForwardingStats {
    /// Per-target detail, ordered by target id.
    pub targets: Vec<TargetStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_balances_the_ledger() {
        let counters = TargetCounters::default();
        counters.add(&counters.received, 10);
        counters.add(&counters.forwarded, 5);
        counters.add(&counters.failed, 2);
        counters.add(&counters.dropped, 1);

        let stats = TargetStats::snapshot("t1", CircuitState::Active, &counters);
        assert_eq!(stats.in_flight, 2);
        assert_eq!(
            stats.received,
            stats.forwarded + stats.failed + stats.dropped + stats.in_flight
        );
    }
}
