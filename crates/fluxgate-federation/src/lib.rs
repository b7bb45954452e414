//! # Fluxgate Federation
//!
//! The federation layer behind the control surface: a thread-safe registry
//! of external MCP servers with protocol-specific service wrappers, periodic
//! multi-source discovery with diff events, a pairwise protocol bridge,
//! pluggable authentication with a TTL token cache, and the health monitor
//! that drives server status.

pub mod auth;
pub mod bridge;
pub mod discovery;
pub mod health;
pub mod registry;
pub mod service;

pub use auth::{AuthManager, CacheStats, CredentialProvider};
pub use bridge::ProtocolBridge;
pub use discovery::{DiscoveryEngine, DiscoveryEvent, DiscoverySource};
pub use health::HealthMonitor;
pub use registry::{FederationMetrics, FederationRegistry};
pub use service::{McpService, ServiceFactory};
