//! # Fluxgate Server
//!
//! Assembles the gateway: HTTP ingestion and admin surface, the WebSocket
//! event stream, configuration loading, telemetry, and graceful shutdown.
//! The binary lives in `main.rs`; the library surface exists so integration
//! tests can drive a fully wired gateway on ephemeral listeners.

pub mod config;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;

pub use config::GatewayConfig;
pub use routes::{api_router, health_router};
pub use state::{AppState, SharedState};
