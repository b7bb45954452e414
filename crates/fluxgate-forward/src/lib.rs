//! # Fluxgate Forwarding Engine
//!
//! Drains the event pipeline and delivers rule-matched events to downstream
//! sinks with retry, rate limiting, batching, and circuit breaking. Each
//! target owns its client and queue; outcomes land in per-target counters
//! and the process metrics registry.

pub mod circuit;
pub mod clients;
pub mod engine;
pub mod rate_limit;
pub mod retry;
pub mod stats;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use clients::{ClientRegistry, SinkClient};
pub use engine::{ForwardingConfig, ForwardingEngine};
pub use rate_limit::RuleRateLimiter;
pub use retry::RetryPolicy;
pub use stats::{ForwardingStats, TargetStats};
