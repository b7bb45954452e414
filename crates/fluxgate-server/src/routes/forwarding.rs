//! Forwarding target administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use fluxgate_types::ForwardingTarget;

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// `GET /api/v1/forwarding/targets`
pub async fn list(State(state): State<SharedState>) -> Json<Vec<ForwardingTarget>> {
    Json(state.forwarding.list_targets())
}

/// `POST /api/v1/forwarding/targets`
pub async fn create(
    State(state): State<SharedState>,
    Json(target): Json<ForwardingTarget>,
) -> ApiResult<(StatusCode, Json<ForwardingTarget>)> {
    state.forwarding.add_target(target.clone()).map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(target)))
}

/// `PUT /api/v1/forwarding/targets/{id}`
pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(target): Json<ForwardingTarget>,
) -> ApiResult<Json<ForwardingTarget>> {
    state
        .forwarding
        .update_target(&id, target.clone())
        .await
        .map_err(ApiError)?;
    Ok(Json(target))
}

/// `DELETE /api/v1/forwarding/targets/{id}`
pub async fn remove(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.forwarding.remove_target(&id).await.map_err(ApiError)?;
    Ok(StatusCode::NO_CONTENT)
}
