//! gRPC sink client over a long-lived channel.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fluxgate_grpc::{GrpcClient, GrpcClientConfig};
use fluxgate_types::{Event, ForwardingTarget, GatewayError, GatewayResult};

use super::SinkClient;

/// Forwards events over one lazily-connected gRPC channel.
#[derive(Debug, Clone)]
pub struct GrpcSinkClient {
    client: GrpcClient,
}

impl GrpcSinkClient {
    /// Build the client from a target definition.
    pub fn new(target: &ForwardingTarget) -> GatewayResult<Self> {
        let client = GrpcClient::connect_lazy_with_config(
            &target.endpoint,
            GrpcClientConfig {
                connect_timeout: Duration::from_secs(10).min(target.config.timeout()),
                request_timeout: target.config.timeout(),
            },
        )?;
        Ok(Self { client })
    }

    fn check_ack(event_id: &str, status: &str) -> GatewayResult<()> {
        if status.is_empty() || status == "accepted" {
            Ok(())
        } else {
            Err(GatewayError::remote(
                500,
                format!("sink rejected event {event_id}: {status}"),
            ))
        }
    }
}

#[async_trait]
impl SinkClient for GrpcSinkClient {
    async fn deliver(&self, event: &Event) -> GatewayResult<()> {
        let ack = self.client.forward_event(event).await?;
        debug!(event_id = %ack.event_id, status = %ack.status, "grpc delivery");
        Self::check_ack(&ack.event_id, &ack.status)
    }

    async fn deliver_batch(&self, events: &[Event]) -> GatewayResult<()> {
        let response = self.client.forward_event_batch(events).await?;
        for ack in &response.results {
            Self::check_ack(&ack.event_id, &ack.status)?;
        }
        Ok(())
    }

    async fn probe(&self) -> GatewayResult<()> {
        self.client.ping().await
    }
}
