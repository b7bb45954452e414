//! Event ingestion endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::Serialize;
use tracing::debug;

use fluxgate_types::GatewayError;

use crate::error::{ApiError, ApiResult};
use crate::routes::MAX_BATCH_EVENTS;
use crate::state::SharedState;

/// Acknowledgement for a single accepted event.
#[derive(Debug, Serialize)]
pub struct EventAck {
    /// Echoed event id.
    pub event_id: String,
    /// Always `accepted` on the 200 path.
    pub status: &'static str,
}

/// Per-element outcome inside a batch response.
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    /// The element's event id (empty when it could not be extracted).
    pub event_id: String,
    /// `accepted` or `rejected`.
    pub status: &'static str,
    /// Machine-usable rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Batch response envelope.
#[derive(Debug, Serialize)]
pub struct BatchResult {
    /// Elements examined.
    pub processed: usize,
    /// Parallel to the request array.
    pub results: Vec<BatchEntry>,
}

/// `POST /api/v1/events` - single-event ingestion.
pub async fn ingest(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<EventAck>> {
    let event = state
        .codec
        .decode(&body)
        .map_err(|e| ApiError(GatewayError::from(e)))?;
    let event_id = state.ingest(event).await.map_err(ApiError)?;
    Ok(Json(EventAck {
        event_id,
        status: "accepted",
    }))
}

/// `POST /api/v1/events/batch` - up to 1000 events, per-element outcomes.
///
/// The response is 200 whenever the envelope parses, even if individual
/// elements fail.
pub async fn ingest_batch(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<BatchResult>> {
    let elements = state
        .codec
        .decode_batch(&body)
        .map_err(|e| ApiError(GatewayError::from(e)))?;
    if elements.len() > MAX_BATCH_EVENTS {
        return Err(ApiError(GatewayError::validation(format!(
            "batch of {} events exceeds the limit of {MAX_BATCH_EVENTS}",
            elements.len()
        ))));
    }

    let mut results = Vec::with_capacity(elements.len());
    for element in elements {
        let entry = match element {
            Ok(event) => {
                let event_id = event.event_id.clone();
                match state.ingest(event).await {
                    Ok(event_id) => BatchEntry {
                        event_id,
                        status: "accepted",
                        reason: None,
                    },
                    Err(err) => {
                        debug!(%err, "batch element rejected at publish");
                        BatchEntry {
                            event_id,
                            status: "rejected",
                            reason: Some(match err {
                                GatewayError::Backpressure { .. } => "backpressure".to_string(),
                                other => other.to_string(),
                            }),
                        }
                    }
                }
            }
            Err(element_error) => BatchEntry {
                event_id: element_error.event_id,
                status: "rejected",
                reason: Some(element_error.reason.to_string()),
            },
        };
        results.push(entry);
    }

    Ok(Json(BatchResult {
        processed: results.len(),
        results,
    }))
}

/// `GET /api/v1/stats` - pipeline and forwarding counters.
pub async fn stats(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "pipeline": state.pipeline.stats(),
        "forwarding": state.forwarding.stats(),
    }))
}
