//! Static discovery source: servers inlined in the source config.

use async_trait::async_trait;

use fluxgate_types::{
    DiscoverySourceSpec, DiscoverySourceType, GatewayError, GatewayResult, McpServer,
};

use super::DiscoverySource;

/// Serves a fixed list parsed from the spec's `servers` key.
#[derive(Debug)]
pub struct StaticSource {
    id: String,
    servers: Vec<McpServer>,
}

impl StaticSource {
    /// Parse the server list out of the spec config.
    pub fn from_spec(spec: &DiscoverySourceSpec) -> GatewayResult<Self> {
        let servers = match spec.config.get("servers") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| GatewayError::validation(format!("static source servers: {e}")))?,
            None => Vec::new(),
        };
        Ok(Self {
            id: spec.id.clone(),
            servers,
        })
    }
}

#[async_trait]
impl DiscoverySource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> DiscoverySourceType {
        DiscoverySourceType::Static
    }

    async fn discover(&self) -> GatewayResult<Vec<McpServer>> {
        Ok(self.servers.clone())
    }
}
