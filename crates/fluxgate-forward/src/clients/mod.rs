//! Sink clients and the kind-keyed client factory table.
//!
//! Each target kind maps to a factory producing a [`SinkClient`]. The
//! bundled kinds cover webhook/HTTP, gRPC, Kafka (REST producer), and Argo
//! Events; additional kinds register custom factories at startup.

mod argo;
mod grpc;
mod kafka;
mod webhook;

pub use argo::ArgoEventsClient;
pub use grpc::GrpcSinkClient;
pub use kafka::KafkaRestClient;
pub use webhook::WebhookClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fluxgate_types::{
    AuthConfig, AuthType, Event, ForwardingTarget, GatewayError, GatewayResult, TargetKind,
};

/// A kind-specific delivery client.
///
/// Implementations hold their own connection state (pooled HTTP client,
/// long-lived channel, producer) so a slow target never shares a connection
/// with another target.
#[async_trait]
pub trait SinkClient: Send + Sync + std::fmt::Debug {
    /// Deliver one event.
    async fn deliver(&self, event: &Event) -> GatewayResult<()>;

    /// Deliver a batch in buffer order. Defaults to sequential single
    /// delivery; sinks with native batch support override.
    async fn deliver_batch(&self, events: &[Event]) -> GatewayResult<()> {
        for event in events {
            self.deliver(event).await?;
        }
        Ok(())
    }

    /// Cheap reachability probe used while the target circuit is
    /// recovering. Defaults to "no opinion".
    async fn probe(&self) -> GatewayResult<()> {
        Ok(())
    }
}

/// Factory producing a client for one target.
pub type ClientFactory =
    Arc<dyn Fn(&ForwardingTarget) -> GatewayResult<Arc<dyn SinkClient>> + Send + Sync>;

/// Kind-keyed factory table, populated once at startup.
#[derive(Clone)]
pub struct ClientRegistry {
    factories: HashMap<TargetKind, ClientFactory>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(TargetKind::Webhook, |target| {
            Ok(Arc::new(WebhookClient::new(target)?) as Arc<dyn SinkClient>)
        });
        registry.register(TargetKind::Grpc, |target| {
            Ok(Arc::new(GrpcSinkClient::new(target)?) as Arc<dyn SinkClient>)
        });
        registry.register(TargetKind::Kafka, |target| {
            Ok(Arc::new(KafkaRestClient::new(target)?) as Arc<dyn SinkClient>)
        });
        registry.register(TargetKind::ArgoEvents, |target| {
            Ok(Arc::new(ArgoEventsClient::new(target)?) as Arc<dyn SinkClient>)
        });
        registry
    }
}

impl ClientRegistry {
    /// Register a factory for a kind, replacing any existing one.
    pub fn register<F>(&mut self, kind: TargetKind, factory: F)
    where
        F: Fn(&ForwardingTarget) -> GatewayResult<Arc<dyn SinkClient>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Build a client for the target, failing for kinds with no factory.
    pub fn create(&self, target: &ForwardingTarget) -> GatewayResult<Arc<dyn SinkClient>> {
        let factory = self.factories.get(&target.kind).ok_or_else(|| {
            GatewayError::validation(format!(
                "no client factory registered for target kind {}",
                target.kind
            ))
        })?;
        factory(target)
    }
}

/// Build a reqwest client with the target's headers and static credentials
/// installed as default headers.
///
/// Shared by every HTTP-family sink. OAuth2 sink credentials are rejected at
/// target registration; sinks carry static credentials only.
pub(crate) fn http_client_for(
    headers: &HashMap<String, String>,
    auth: Option<&AuthConfig>,
    timeout: std::time::Duration,
) -> GatewayResult<reqwest::Client> {
    use base64::Engine as _;
    use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::validation(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| GatewayError::validation(format!("invalid header value: {e}")))?;
        map.insert(name, value);
    }

    if let Some(auth) = auth {
        match auth.auth_type {
            AuthType::None => {}
            AuthType::ApiKey => {
                let header = auth.get("header").unwrap_or("X-API-Key");
                let key = auth
                    .get("api_key")
                    .or_else(|| auth.get("key"))
                    .ok_or_else(|| GatewayError::validation("api_key auth requires `api_key`"))?;
                let name = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                    GatewayError::validation(format!("invalid api_key header {header}: {e}"))
                })?;
                map.insert(
                    name,
                    HeaderValue::from_str(key)
                        .map_err(|e| GatewayError::validation(format!("invalid api_key: {e}")))?,
                );
            }
            AuthType::Basic => {
                let username = auth
                    .get("username")
                    .ok_or_else(|| GatewayError::validation("basic auth requires `username`"))?;
                let password = auth.get("password").unwrap_or_default();
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                map.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Basic {encoded}"))
                        .map_err(|e| GatewayError::validation(format!("invalid basic auth: {e}")))?,
                );
            }
            AuthType::Bearer | AuthType::Jwt => {
                let token = auth
                    .get("token")
                    .ok_or_else(|| GatewayError::validation("bearer auth requires `token`"))?;
                map.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| GatewayError::validation(format!("invalid token: {e}")))?,
                );
            }
            AuthType::Oauth2 => {
                return Err(GatewayError::validation(
                    "oauth2 credentials are not supported on forwarding targets",
                ));
            }
        }
    }

    reqwest::Client::builder()
        .default_headers(map)
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::internal(format!("http client build: {e}")))
}

/// Map an HTTP response to the delivery outcome: 2xx succeeds, anything
/// else surfaces as a remote error carrying the status code.
pub(crate) async fn classify_response(response: reqwest::Response) -> GatewayResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        // Sink error bodies can be large; keep the head.
        body.chars().take(256).collect()
    };
    Err(GatewayError::remote(i64::from(status.as_u16()), message))
}

/// Map a reqwest error to the delivery outcome: timeouts and connect
/// failures are transport errors (retryable).
pub(crate) fn classify_send_error(err: reqwest::Error) -> GatewayError {
    GatewayError::transport(err.to_string())
}
