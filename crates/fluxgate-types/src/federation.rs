//! Federated MCP server records, auth configuration, and discovery sources.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport protocol a federated server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// JSON over HTTP.
    Http,
    /// gRPC over a long-lived channel.
    Grpc,
    /// Server-sent events.
    Sse,
    /// JSON-RPC over a child process's stdio.
    Stdio,
}

impl Protocol {
    /// Wire name of the protocol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Sse => "sse",
            Self::Stdio => "stdio",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential scheme for a server or sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No credentials.
    #[default]
    None,
    /// Static key in a configurable header.
    ApiKey,
    /// HTTP basic auth.
    Basic,
    /// Static bearer token.
    Bearer,
    /// Locally signed JWT.
    Jwt,
    /// OAuth2 client-credentials flow.
    Oauth2,
}

/// Auth scheme plus its scheme-specific configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Credential scheme.
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    /// Scheme-specific settings (key names documented per provider).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, String>,
}

impl AuthConfig {
    /// A config with no credentials.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fetch a scheme setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}

/// Health state of a federated server. Mutated only by the health monitor
/// and discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Not yet probed.
    #[default]
    Unknown,
    /// Passing probes.
    Healthy,
    /// Failing probes.
    Unhealthy,
    /// Operator-declared maintenance; excluded from broadcast.
    Maintenance,
    /// Kept for lookup but scheduled for removal.
    Deprecated,
}

/// Per-server health probing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Probes run only when enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between probes.
    #[serde(default = "hc_defaults::interval_secs")]
    pub interval_secs: u64,
    /// Per-probe timeout in seconds.
    #[serde(default = "hc_defaults::timeout_secs")]
    pub timeout_secs: u64,
    /// Consecutive successes before `healthy`.
    #[serde(default = "hc_defaults::healthy_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures before `unhealthy`.
    #[serde(default = "hc_defaults::unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Probe path appended to the endpoint for HTTP probes.
    #[serde(default = "hc_defaults::path")]
    pub path: String,
}

mod hc_defaults {
    pub(super) fn interval_secs() -> u64 {
        30
    }
    pub(super) fn timeout_secs() -> u64 {
        5
    }
    pub(super) fn healthy_threshold() -> u32 {
        2
    }
    pub(super) fn unhealthy_threshold() -> u32 {
        3
    }
    pub(super) fn path() -> String {
        "/health".to_string()
    }
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: hc_defaults::interval_secs(),
            timeout_secs: hc_defaults::timeout_secs(),
            healthy_threshold: hc_defaults::healthy_threshold(),
            unhealthy_threshold: hc_defaults::unhealthy_threshold(),
            path: hc_defaults::path(),
        }
    }
}

impl HealthCheckSpec {
    /// Probe interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A federated MCP server record. Owned exclusively by the registry; reads
/// hand out deep copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    /// Unique id across the registry.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Server version string.
    #[serde(default)]
    pub version: String,
    /// Catalog category.
    #[serde(default)]
    pub category: String,
    /// Protocol-specific address (URL, host:port, or command line).
    pub endpoint: String,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Credentials for outbound calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Advertised capabilities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form metadata; discovery stamps provenance keys here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Current health status.
    #[serde(default)]
    pub status: ServerStatus,
    /// Probe configuration.
    #[serde(default)]
    pub health_check: HealthCheckSpec,
    /// Set by the registry at registration.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Advances monotonically on any mutation.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl McpServer {
    /// Minimal record for the given id/endpoint/protocol; remaining fields
    /// take their defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, protocol: Protocol) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            version: String::new(),
            category: String::new(),
            endpoint: endpoint.into(),
            protocol,
            auth: None,
            capabilities: Vec::new(),
            tags: Vec::new(),
            metadata: HashMap::new(),
            status: ServerStatus::Unknown,
            health_check: HealthCheckSpec::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this server participates in broadcast.
    #[must_use]
    pub fn broadcast_eligible(&self) -> bool {
        self.status == ServerStatus::Healthy
    }
}

/// A single OAuth-style token grant returned by an auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    /// The credential itself.
    pub access_token: String,
    /// Scheme, typically `Bearer`.
    pub token_type: String,
    /// Absolute expiry; the cache never returns a token past this instant.
    pub expires_at: DateTime<Utc>,
    /// Optional refresh credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl AuthToken {
    /// Whether the token is expired at `now`.
    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Kind of a discovery source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySourceType {
    /// Server list inlined in the source config.
    Static,
    /// HTTP catalog endpoint.
    Registry,
    /// Kubernetes service discovery.
    Kubernetes,
    /// Consul catalog.
    Consul,
    /// etcd prefix scan.
    Etcd,
    /// DNS SRV records.
    Dns,
}

impl DiscoverySourceType {
    /// Wire name of the source type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Registry => "registry",
            Self::Kubernetes => "kubernetes",
            Self::Consul => "consul",
            Self::Etcd => "etcd",
            Self::Dns => "dns",
        }
    }
}

/// Declarative configuration of one discovery source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySourceSpec {
    /// Unique source id.
    pub id: String,
    /// Source kind.
    #[serde(rename = "type")]
    pub source_type: DiscoverySourceType,
    /// Kind-specific settings.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    /// Disabled sources are skipped by the discovery loop.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Higher priority wins id conflicts in the merged snapshot.
    #[serde(default)]
    pub priority: i32,
}

fn enabled_default() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn protocol_wire_names() {
        assert_eq!(serde_json::to_string(&Protocol::Stdio).unwrap(), "\"stdio\"");
        let p: Protocol = serde_json::from_str("\"grpc\"").unwrap();
        assert_eq!(p, Protocol::Grpc);
    }

    #[test]
    fn server_defaults_to_unknown_status() {
        let server = McpServer::new("s1", "http://x", Protocol::Http);
        assert_eq!(server.status, ServerStatus::Unknown);
        assert!(!server.broadcast_eligible());
    }

    #[test]
    fn maintenance_is_not_broadcast_eligible() {
        let mut server = McpServer::new("s1", "http://x", Protocol::Http);
        server.status = ServerStatus::Maintenance;
        assert!(!server.broadcast_eligible());
        server.status = ServerStatus::Healthy;
        assert!(server.broadcast_eligible());
    }

    #[test]
    fn server_deserializes_from_minimal_json() {
        let server: McpServer = serde_json::from_str(
            r#"{"id":"s1","endpoint":"http://x","protocol":"http","health_check":{"enabled":true,"healthy_threshold":1,"unhealthy_threshold":1}}"#,
        )
        .unwrap();
        assert!(server.health_check.enabled);
        assert_eq!(server.health_check.healthy_threshold, 1);
        assert_eq!(server.health_check.interval_secs, 30);
        assert_eq!(server.health_check.path, "/health");
    }

    #[test]
    fn auth_token_expiry() {
        let now = Utc::now();
        let token = AuthToken {
            access_token: "t".into(),
            token_type: "Bearer".into(),
            expires_at: now + chrono::Duration::seconds(60),
            refresh_token: None,
            scope: None,
        };
        assert!(!token.expired_at(now));
        assert!(token.expired_at(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn discovery_spec_defaults() {
        let spec: DiscoverySourceSpec =
            serde_json::from_str(r#"{"id":"d1","type":"static"}"#).unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.source_type, DiscoverySourceType::Static);
    }
}
