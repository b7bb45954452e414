//! Fluxgate gateway binary.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fluxgate_server::{GatewayConfig, api_router, health_router, shutdown, state::AppState, telemetry};

/// Event-ingestion gateway and MCP federation hub.
#[derive(Debug, Parser)]
#[command(name = "fluxgate", version, about)]
struct Args {
    /// Path to a JSON configuration file. Environment variables with the
    /// FLUXGATE_ prefix override file values.
    #[arg(long, env = "FLUXGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(&config.log.level, &config.log.format);

    let api_bind = config.server.bind.clone();
    let health_bind = config.server.health_bind.clone();
    let state = AppState::build(config).context("assembling gateway")?;

    let api_listener = tokio::net::TcpListener::bind(&api_bind)
        .await
        .with_context(|| format!("binding api listener on {api_bind}"))?;
    let health_listener = tokio::net::TcpListener::bind(&health_bind)
        .await
        .with_context(|| format!("binding health listener on {health_bind}"))?;
    info!(%api_bind, %health_bind, "listeners bound");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown::watch_signals(cancel.clone()));

    let api = axum::serve(api_listener, api_router(state.clone()));
    let health = axum::serve(health_listener, health_router(state.clone()));
    let api_cancel = cancel.clone();
    let health_cancel = cancel.clone();

    let (api_result, health_result) = tokio::join!(
        api.with_graceful_shutdown(async move { api_cancel.cancelled().await }),
        health.with_graceful_shutdown(async move { health_cancel.cancelled().await }),
    );
    api_result.context("api listener")?;
    health_result.context("health listener")?;

    state.shutdown().await;
    Ok(())
}
