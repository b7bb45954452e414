//! # Fluxgate Types
//!
//! Canonical data model shared by every Fluxgate crate: the event record,
//! forwarding targets and rules, federated MCP server records, the MCP
//! request/response envelope, and the unified error type.
//!
//! All types serialize with serde using the wire field names producers and
//! admin clients see; crates layered on top add behavior, never new fields.

pub mod error;
pub mod event;
pub mod federation;
pub mod forwarding;
pub mod message;

pub use error::{GatewayError, GatewayResult};
pub use event::{Event, MAX_EVENT_SIZE};
pub use federation::{
    AuthConfig, AuthToken, AuthType, DiscoverySourceSpec, DiscoverySourceType, HealthCheckSpec,
    McpServer, Protocol, ServerStatus,
};
pub use forwarding::{
    ConditionOperator, EventTransform, ForwardingRule, ForwardingTarget, RateLimitSpec,
    RuleCondition, TargetConfig, TargetKind,
};
pub use message::{McpRequest, McpResponse, RemoteErrorObject};
