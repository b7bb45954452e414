//! # Fluxgate gRPC Plumbing
//!
//! Message definitions and a hand-rolled tonic client shared by the gRPC
//! forwarding sink and the gRPC federation service wrapper.
//!
//! The wire messages are defined directly with prost derives rather than a
//! protoc build step; the service paths below are the contract:
//!
//! - `/fluxgate.v1.EventGateway/ForwardEvent`
//! - `/fluxgate.v1.EventGateway/ForwardEventBatch`
//! - `/fluxgate.v1.McpService/Invoke`
//! - `/fluxgate.v1.McpService/Ping`

pub mod client;
pub mod convert;
pub mod error;
pub mod proto;

pub use client::{GrpcClient, GrpcClientConfig};
pub use error::status_to_error;
