//! Wire messages for the Fluxgate gRPC surfaces.
//!
//! Field tags are frozen; add fields with new tags, never renumber.

use std::collections::HashMap;

/// The event record as carried on the gRPC wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventRecord {
    /// Producer-assigned id.
    #[prost(string, tag = "1")]
    pub event_id: String,
    /// Dotted lowercase type.
    #[prost(string, tag = "2")]
    pub event_type: String,
    /// Producer identifier.
    #[prost(string, tag = "3")]
    pub source: String,
    /// Seconds since the Unix epoch; zero means unset.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    /// JSON payload.
    #[prost(string, tag = "5")]
    pub data: String,
    /// Producer metadata.
    #[prost(map = "string, string", tag = "6")]
    pub metadata: HashMap<String, String>,
}

/// Single-event forward call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardEventRequest {
    /// The event to deliver.
    #[prost(message, optional, tag = "1")]
    pub event: Option<EventRecord>,
}

/// Acknowledgement for one forwarded event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardEventResponse {
    /// Echoed event id.
    #[prost(string, tag = "1")]
    pub event_id: String,
    /// `accepted` or a sink-specific rejection token.
    #[prost(string, tag = "2")]
    pub status: String,
}

/// Batched forward call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardEventBatchRequest {
    /// Events in buffer order.
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<EventRecord>,
}

/// Acknowledgement for a forwarded batch.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardEventBatchResponse {
    /// Per-event acknowledgements, parallel to the request.
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<ForwardEventResponse>,
}

/// MCP invocation over gRPC. Params travel as a JSON document.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvokeRequest {
    /// Correlation id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Method name.
    #[prost(string, tag = "2")]
    pub method: String,
    /// JSON-encoded params object.
    #[prost(string, tag = "3")]
    pub params_json: String,
    /// Transport metadata.
    #[prost(map = "string, string", tag = "4")]
    pub metadata: HashMap<String, String>,
}

/// MCP invocation response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvokeResponse {
    /// Echoed correlation id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// JSON-encoded result; absent on error.
    #[prost(string, optional, tag = "2")]
    pub result_json: Option<String>,
    /// Error detail; absent on success.
    #[prost(message, optional, tag = "3")]
    pub error: Option<ErrorDetail>,
    /// Transport metadata.
    #[prost(map = "string, string", tag = "4")]
    pub meta: HashMap<String, String>,
}

/// Error payload inside an [`InvokeResponse`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorDetail {
    /// Remote error code.
    #[prost(int64, tag = "1")]
    pub code: i64,
    /// Human-readable message.
    #[prost(string, tag = "2")]
    pub message: String,
    /// JSON-encoded structured detail; absent when none.
    #[prost(string, optional, tag = "3")]
    pub data_json: Option<String>,
}

/// Liveness probe.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {}

/// Liveness probe response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {
    /// `ok` when the server is serving.
    #[prost(string, tag = "1")]
    pub status: String,
}
