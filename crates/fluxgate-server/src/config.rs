//! Gateway configuration.
//!
//! Loaded from an optional JSON file plus `FLUXGATE_`-prefixed environment
//! variables; the environment overrides the file, and unknown file keys are
//! tolerated. Nested keys use `__` in the environment, e.g.
//! `FLUXGATE_SERVER__BIND=0.0.0.0:9090`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fluxgate_types::{DiscoverySourceSpec, ForwardingTarget};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener addresses.
    pub server: ServerSection,
    /// Logging.
    pub log: LogSection,
    /// Event pipeline sizing.
    pub pipeline: PipelineSection,
    /// Forwarding engine.
    pub forwarding: ForwardingSection,
    /// Federation subsystems.
    pub federation: FederationSection,
}

/// Listener addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// API listener (ingestion + admin).
    pub bind: String,
    /// Health/readiness listener.
    pub health_bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            health_bind: "0.0.0.0:8081".to_string(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Default level filter (`RUST_LOG` overrides).
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Event pipeline sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Main channel capacity.
    pub capacity: usize,
    /// Per-subscriber queue capacity.
    pub subscriber_capacity: usize,
    /// Bounded publish wait before backpressure, in milliseconds.
    pub publish_wait_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            capacity: 1000,
            subscriber_capacity: 100,
            publish_wait_ms: 50,
        }
    }
}

impl PipelineSection {
    pub(crate) fn to_pipeline_config(&self) -> fluxgate_pipeline::PipelineConfig {
        fluxgate_pipeline::PipelineConfig {
            capacity: self.capacity,
            subscriber_capacity: self.subscriber_capacity,
            publish_wait: Duration::from_millis(self.publish_wait_ms),
        }
    }
}

/// Forwarding engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingSection {
    /// Master switch.
    pub enabled: bool,
    /// Worker tasks.
    pub workers: usize,
    /// Per-target queue capacity.
    pub queue_capacity: usize,
    /// Consecutive failures before a target circuit opens.
    pub circuit_failure_threshold: u32,
    /// Circuit cool-down in seconds.
    pub circuit_cooldown_secs: u64,
    /// Targets registered at startup.
    pub targets: Vec<ForwardingTarget>,
}

impl Default for ForwardingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 5,
            queue_capacity: 1000,
            circuit_failure_threshold: 5,
            circuit_cooldown_secs: 30,
            targets: Vec::new(),
        }
    }
}

impl ForwardingSection {
    pub(crate) fn to_forwarding_config(&self) -> fluxgate_forward::ForwardingConfig {
        fluxgate_forward::ForwardingConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            circuit: fluxgate_forward::CircuitConfig {
                degraded_threshold: self.circuit_failure_threshold.div_ceil(2),
                failure_threshold: self.circuit_failure_threshold,
                cooldown: Duration::from_secs(self.circuit_cooldown_secs),
            },
        }
    }
}

/// Federation subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationSection {
    /// Master switch for discovery and health monitoring loops.
    pub enabled: bool,
    /// Discovery cycle interval in seconds.
    pub discovery_interval_secs: u64,
    /// Per-call timeout for broadcast fan-out, in seconds.
    pub broadcast_timeout_secs: u64,
    /// Expired-token sweep interval in seconds.
    pub token_sweep_interval_secs: u64,
    /// Discovery sources configured at startup.
    pub sources: Vec<DiscoverySourceSpec>,
}

impl Default for FederationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_interval_secs: 60,
            broadcast_timeout_secs: 10,
            token_sweep_interval_secs: 60,
            sources: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration: JSON file (when present) overridden by
    /// environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Json)
                        .required(true),
                );
            }
            None => {
                builder = builder.add_source(
                    config::File::with_name("fluxgate")
                        .format(config::FileFormat::Json)
                        .required(false),
                );
            }
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FLUXGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_are_sensible() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.pipeline.capacity, 1000);
        assert_eq!(config.forwarding.workers, 5);
        assert!(config.forwarding.enabled);
        assert_eq!(config.federation.discovery_interval_secs, 60);
    }

    #[test]
    fn file_values_apply_and_unknown_keys_are_tolerated() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "server": {{"bind": "127.0.0.1:9999"}},
                "forwarding": {{"workers": 2}},
                "unknown_section": {{"ignored": true}}
            }}"#
        )
        .unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9999");
        assert_eq!(config.forwarding.workers, 2);
        // Unspecified keys keep defaults.
        assert_eq!(config.server.health_bind, "0.0.0.0:8081");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(GatewayConfig::load(Some(Path::new("/nonexistent/fluxgate.json"))).is_err());
    }

    #[test]
    fn targets_parse_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "forwarding": {{
                    "targets": [{{
                        "id": "t1", "name": "hooks", "type": "webhook",
                        "endpoint": "http://sink.local/hook",
                        "rules": [{{"id": "r1", "priority": 5, "conditions": []}}]
                    }}]
                }}
            }}"#
        )
        .unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.forwarding.targets.len(), 1);
        assert_eq!(config.forwarding.targets[0].rules[0].priority, 5);
    }
}
