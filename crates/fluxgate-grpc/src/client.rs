//! Hand-rolled tonic client for the Fluxgate gRPC surfaces.
//!
//! The channel is created lazily and lives as long as the client, so a sink
//! or service wrapper holds one connection across calls. Calls go through
//! `tonic::client::Grpc` directly with a prost codec; there is no generated
//! stub layer.

use std::time::Duration;

use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tonic_prost::ProstCodec;
use tracing::debug;

use fluxgate_types::{Event, GatewayError, GatewayResult, McpRequest, McpResponse};

use crate::error::status_to_error;
use crate::proto;

const FORWARD_EVENT: &str = "/fluxgate.v1.EventGateway/ForwardEvent";
const FORWARD_EVENT_BATCH: &str = "/fluxgate.v1.EventGateway/ForwardEventBatch";
const INVOKE: &str = "/fluxgate.v1.McpService/Invoke";
const PING: &str = "/fluxgate.v1.McpService/Ping";

/// Configuration for the gRPC client.
#[derive(Debug, Clone)]
pub struct GrpcClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Long-lived gRPC client over one channel.
#[derive(Debug, Clone)]
pub struct GrpcClient {
    inner: Grpc<Channel>,
}

impl GrpcClient {
    /// Create a client for the given endpoint with default configuration.
    pub fn connect_lazy(endpoint: impl AsRef<str>) -> GatewayResult<Self> {
        Self::connect_lazy_with_config(endpoint, GrpcClientConfig::default())
    }

    /// Create a client with explicit timeouts.
    ///
    /// The underlying channel connects on first use and reconnects on
    /// failure, which is what a forwarding sink wants from a long-lived
    /// channel.
    pub fn connect_lazy_with_config(
        endpoint: impl AsRef<str>,
        config: GrpcClientConfig,
    ) -> GatewayResult<Self> {
        let endpoint = normalize_endpoint(endpoint.as_ref());
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| GatewayError::validation(format!("invalid gRPC endpoint: {e}")))?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .connect_lazy();

        debug!(%endpoint, "gRPC channel created");
        Ok(Self {
            inner: Grpc::new(channel),
        })
    }

    /// Forward one event.
    pub async fn forward_event(&self, event: &Event) -> GatewayResult<proto::ForwardEventResponse> {
        let request = proto::ForwardEventRequest {
            event: Some(event.into()),
        };
        self.unary(request, FORWARD_EVENT).await
    }

    /// Forward a batch of events in buffer order.
    pub async fn forward_event_batch(
        &self,
        events: &[Event],
    ) -> GatewayResult<proto::ForwardEventBatchResponse> {
        let request = proto::ForwardEventBatchRequest {
            events: events.iter().map(Into::into).collect(),
        };
        self.unary(request, FORWARD_EVENT_BATCH).await
    }

    /// Invoke an MCP method on a federated server.
    pub async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse> {
        let wire: proto::InvokeRequest = request.into();
        let response: proto::InvokeResponse = self.unary(wire, INVOKE).await?;
        response.try_into()
    }

    /// Liveness probe.
    pub async fn ping(&self) -> GatewayResult<()> {
        let _: proto::PingResponse = self.unary(proto::PingRequest {}, PING).await?;
        Ok(())
    }

    async fn unary<M1, M2>(&self, message: M1, path: &'static str) -> GatewayResult<M2>
    where
        M1: prost::Message + 'static,
        M2: prost::Message + Default + 'static,
    {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| GatewayError::transport(format!("gRPC channel not ready: {e}")))?;

        let codec: ProstCodec<M1, M2> = ProstCodec::default();
        let response = grpc
            .unary(Request::new(message), PathAndQuery::from_static(path), codec)
            .await
            .map_err(|status: Status| status_to_error(&status))?;
        Ok(response.into_inner())
    }
}

/// tonic wants a scheme; bare `host:port` endpoints get `http://`.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoints_gain_a_scheme() {
        assert_eq!(normalize_endpoint("10.0.0.1:50051"), "http://10.0.0.1:50051");
        assert_eq!(normalize_endpoint("https://x:1"), "https://x:1");
    }

    #[tokio::test]
    async fn lazy_connect_accepts_valid_endpoints() {
        assert!(GrpcClient::connect_lazy("localhost:50051").is_ok());
        assert!(GrpcClient::connect_lazy("http://localhost:50051").is_ok());
    }

    #[tokio::test]
    async fn lazy_connect_rejects_garbage() {
        assert!(GrpcClient::connect_lazy("http://exa mple").is_err());
    }

    #[tokio::test]
    async fn calls_against_dead_endpoint_surface_transport_errors() {
        let client = GrpcClient::connect_lazy_with_config(
            "http://127.0.0.1:1",
            GrpcClientConfig {
                connect_timeout: Duration::from_millis(200),
                request_timeout: Duration::from_millis(200),
            },
        )
        .unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.is_retryable(), "expected retryable, got {err:?}");
    }
}
