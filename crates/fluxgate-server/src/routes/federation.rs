//! Federation control surface.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::debug;

use fluxgate_types::{GatewayError, McpRequest, McpResponse, McpServer};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// `GET /api/v1/federation/servers`
pub async fn list_servers(State(state): State<SharedState>) -> Json<Vec<McpServer>> {
    Json(state.registry.list())
}

/// `POST /api/v1/federation/servers`
pub async fn register_server(
    State(state): State<SharedState>,
    Json(server): Json<McpServer>,
) -> ApiResult<(StatusCode, Json<McpServer>)> {
    let registered = state.registry.register(server).map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(registered)))
}

/// `GET /api/v1/federation/servers/{id}`
pub async fn get_server(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<McpServer>> {
    Ok(Json(state.registry.get(&id).map_err(ApiError)?))
}

/// `DELETE /api/v1/federation/servers/{id}`
pub async fn delete_server(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.unregister(&id).await.map_err(ApiError)?;
    state.auth.invalidate(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/federation/servers/{id}/health`
pub async fn server_health(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let server = state.registry.get(&id).map_err(ApiError)?;
    Ok(Json(serde_json::json!({
        "server_id": server.id,
        "status": server.status,
        "health_check": server.health_check,
        "updated_at": server.updated_at,
    })))
}

/// `POST /api/v1/federation/servers/{id}/invoke`
///
/// Admin request -> registry lookup -> service wrapper (auth + bridge +
/// protocol client) -> response to caller with the originating id.
pub async fn invoke(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(mut request): Json<McpRequest>,
) -> ApiResult<Json<McpResponse>> {
    if request.id.is_empty() {
        request.id = uuid::Uuid::new_v4().to_string();
    }
    let service = state.registry.service(&id).map_err(ApiError)?;
    let response = service.invoke(request).await.map_err(ApiError)?;
    Ok(Json(response))
}

/// One entry in a broadcast response, ordered by server id.
#[derive(Debug, Serialize)]
pub struct BroadcastEntry {
    /// The federated server.
    pub server_id: String,
    /// Its response, when the call succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<McpResponse>,
    /// The per-entry failure, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Broadcast response envelope.
#[derive(Debug, Serialize)]
pub struct BroadcastResult {
    /// The request id echoed by every entry.
    pub request_id: String,
    /// Healthy servers at dispatch time.
    pub total: usize,
    /// Entries that returned a response.
    pub succeeded: usize,
    /// Per-server outcomes, ordered by server id.
    pub responses: Vec<BroadcastEntry>,
}

/// `POST /api/v1/federation/broadcast`
///
/// Dispatches the request to every currently healthy server concurrently
/// with a per-call timeout. Partial failures stay per-entry; the call fails
/// top-level only when no server produced a response.
pub async fn broadcast(
    State(state): State<SharedState>,
    Json(mut request): Json<McpRequest>,
) -> ApiResult<Json<BroadcastResult>> {
    if request.id.is_empty() {
        request.id = uuid::Uuid::new_v4().to_string();
    }
    let timeout = Duration::from_secs(state.config.federation.broadcast_timeout_secs.max(1));

    // Snapshot under the registry read lock; already ordered by id, which
    // fixes the response order deterministically.
    let servers = state.registry.healthy_servers();
    debug!(servers = servers.len(), request = %request.id, "broadcast dispatch");

    let calls = servers.iter().map(|server| {
        let request = request.clone();
        let registry = &state.registry;
        let server_id = server.id.clone();
        async move {
            let outcome = match registry.service(&server_id) {
                Ok(service) => match tokio::time::timeout(timeout, service.invoke(request)).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
                },
                Err(err) => Err(err.to_string()),
            };
            match outcome {
                Ok(response) => BroadcastEntry {
                    server_id,
                    response: Some(response),
                    error: None,
                },
                Err(error) => BroadcastEntry {
                    server_id,
                    response: None,
                    error: Some(error),
                },
            }
        }
    });
    let responses: Vec<BroadcastEntry> = futures::future::join_all(calls).await;

    let succeeded = responses.iter().filter(|e| e.response.is_some()).count();
    if succeeded == 0 {
        return Err(ApiError(GatewayError::transport(
            "broadcast received no responses",
        )));
    }
    Ok(Json(BroadcastResult {
        request_id: request.id,
        total: responses.len(),
        succeeded,
        responses,
    }))
}

/// `GET /api/v1/federation/metrics`
pub async fn federation_metrics(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "registry": state.registry.metrics(),
        "token_cache": state.auth.cache_stats(),
    }))
}

/// `GET /api/v1/federation/categories/{category}/servers`
pub async fn category_servers(
    State(state): State<SharedState>,
    Path(category): Path<String>,
) -> Json<Vec<McpServer>> {
    Json(state.registry.list_by_category(&category))
}
