//! Argo Events sink client.
//!
//! Argo's webhook event source accepts a plain JSON POST; the payload is the
//! event record itself, with gateway provenance carried in headers.

use async_trait::async_trait;
use tracing::debug;

use fluxgate_types::{Event, ForwardingTarget, GatewayError, GatewayResult};

use super::{SinkClient, classify_response, classify_send_error, http_client_for};

/// HTTP client for an Argo Events webhook event source.
#[derive(Debug, Clone)]
pub struct ArgoEventsClient {
    http: reqwest::Client,
    endpoint: String,
    health_check_url: Option<String>,
}

impl ArgoEventsClient {
    /// Build the client from a target definition.
    pub fn new(target: &ForwardingTarget) -> GatewayResult<Self> {
        url::Url::parse(&target.endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid argo-events endpoint: {e}")))?;
        Ok(Self {
            http: http_client_for(
                &target.config.headers,
                target.config.auth.as_ref(),
                target.config.timeout(),
            )?,
            endpoint: target.endpoint.clone(),
            health_check_url: target.config.health_check_url.clone(),
        })
    }
}

#[async_trait]
impl SinkClient for ArgoEventsClient {
    async fn deliver(&self, event: &Event) -> GatewayResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Fluxgate-Event-Type", &event.event_type)
            .header("X-Fluxgate-Source", &event.source)
            .json(event)
            .send()
            .await
            .map_err(classify_send_error)?;
        debug!(event_id = %event.event_id, status = %response.status(), "argo-events delivery");
        classify_response(response).await
    }

    async fn probe(&self) -> GatewayResult<()> {
        let Some(url) = &self.health_check_url else {
            return Ok(());
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_send_error)?;
        classify_response(response).await
    }
}
