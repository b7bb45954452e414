//! Webhook/HTTP sink client.

use async_trait::async_trait;
use tracing::debug;

use fluxgate_types::{Event, ForwardingTarget, GatewayError, GatewayResult};

use super::{SinkClient, classify_response, classify_send_error, http_client_for};

/// Connection-pooled HTTP client posting event JSON to the target endpoint.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    endpoint: String,
    health_check_url: Option<String>,
}

impl WebhookClient {
    /// Build the client from a target definition.
    pub fn new(target: &ForwardingTarget) -> GatewayResult<Self> {
        url::Url::parse(&target.endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid webhook endpoint: {e}")))?;
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
impl SinkClient for WebhookClient {
    async fn deliver(&self, event: &Event) -> GatewayResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(classify_send_error)?;
        debug!(event_id = %event.event_id, status = %response.status(), "webhook delivery");
        classify_response(response).await
    }

    async fn deliver_batch(&self, events: &[Event]) -> GatewayResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(events)
            .send()
            .await
            .map_err(classify_send_error)?;
        debug!(count = events.len(), status = %response.status(), "webhook batch delivery");
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
