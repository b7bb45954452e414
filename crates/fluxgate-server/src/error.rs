//! Error-to-response mapping for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use fluxgate_types::GatewayError;

/// Wrapper turning [`GatewayError`] into a structured HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: GatewayError,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after_ms = match &self.0 {
            GatewayError::Backpressure { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        let body = ErrorBody {
            message: self.0.to_string(),
            error: self.0,
            retry_after_ms,
        };
        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// Handler result alias.
pub type ApiResult<T> = Result<T, ApiError>;
