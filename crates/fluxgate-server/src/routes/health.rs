//! Health and readiness probes, served on their own listener.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::state::SharedState;

/// `GET /health` - detailed process health.
pub async fn detailed(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let status = if state.is_ready() { "ok" } else { "shutting_down" };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pipeline": state.pipeline.stats(),
        "forwarding_targets": state.forwarding.list_targets().len(),
        "federation": state.registry.metrics(),
    }))
}

/// `GET /ready` - readiness for load balancers; flips to 503 the moment
/// shutdown begins.
pub async fn ready(State(state): State<SharedState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    }
}
