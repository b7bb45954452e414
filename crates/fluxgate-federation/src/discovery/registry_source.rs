//! Registry discovery source: an HTTP catalog endpoint.
//!
//! Expects `{"servers": [...]}` from a GET on the configured `url`, with an
//! optional `api_key` sent as `X-API-Key`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use fluxgate_types::{
    DiscoverySourceSpec, DiscoverySourceType, GatewayError, GatewayResult, McpServer,
};

use super::DiscoverySource;

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    servers: Vec<McpServer>,
}

/// Pulls a server catalog over HTTP.
#[derive(Debug)]
pub struct RegistrySource {
    id: String,
    url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl RegistrySource {
    /// Build from the spec's `url` and optional `api_key`.
    pub fn from_spec(spec: &DiscoverySourceSpec) -> GatewayResult<Self> {
        let url = spec
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::validation("registry source requires `url`"))?;
        url::Url::parse(url)
            .map_err(|e| GatewayError::validation(format!("registry source url: {e}")))?;
        Ok(Self {
            id: spec.id.clone(),
            url: url.to_string(),
            api_key: spec
                .config
                .get("api_key")
                .and_then(|v| v.as_str())
                .map(String::from),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl DiscoverySource for RegistrySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> DiscoverySourceType {
        DiscoverySourceType::Registry
    }

    async fn discover(&self) -> GatewayResult<Vec<McpServer>> {
        let mut request = self.http.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::remote(
                i64::from(status.as_u16()),
                format!("catalog fetch failed: {status}"),
            ));
        }
        let catalog: Catalog = response
            .json()
            .await
            .map_err(|e| GatewayError::validation(format!("malformed catalog: {e}")))?;
        debug!(source = %self.id, servers = catalog.servers.len(), "catalog fetched");
        Ok(catalog.servers)
    }
}
