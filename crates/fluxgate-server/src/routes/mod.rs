//! HTTP surface: ingestion, admin, metrics, and the health listener.

pub mod events;
pub mod federation;
pub mod forwarding;
pub mod health;
pub mod stream;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Batch envelope cap: 10 MiB.
pub const MAX_BATCH_BYTES: usize = 10 * 1024 * 1024;

/// Maximum elements per batch.
pub const MAX_BATCH_EVENTS: usize = 1000;

/// The API router (ingestion + admin), served on the main listener.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/events", post(events::ingest))
        .route("/api/v1/events/batch", post(events::ingest_batch))
        .route("/api/v1/events/stream", get(stream::event_stream))
        .route("/api/v1/stats", get(events::stats))
        .route("/api/v1/metrics", get(render_metrics))
        .route(
            "/api/v1/forwarding/targets",
            get(forwarding::list).post(forwarding::create),
        )
        .route(
            "/api/v1/forwarding/targets/{id}",
            put(forwarding::update).delete(forwarding::remove),
        )
        .route(
            "/api/v1/federation/servers",
            get(federation::list_servers).post(federation::register_server),
        )
        .route(
            "/api/v1/federation/servers/{id}",
            get(federation::get_server).delete(federation::delete_server),
        )
        .route(
            "/api/v1/federation/servers/{id}/health",
            get(federation::server_health),
        )
        .route(
            "/api/v1/federation/servers/{id}/invoke",
            post(federation::invoke),
        )
        .route("/api/v1/federation/broadcast", post(federation::broadcast))
        .route("/api/v1/federation/metrics", get(federation::federation_metrics))
        .route(
            "/api/v1/federation/categories/{category}/servers",
            get(federation::category_servers),
        )
        .layer(DefaultBodyLimit::max(MAX_BATCH_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The health router, served on the separate health listener.
pub fn health_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::detailed))
        .route("/ready", get(health::ready))
        .with_state(state)
}

/// Prometheus exposition.
async fn render_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus.render(),
    )
}
