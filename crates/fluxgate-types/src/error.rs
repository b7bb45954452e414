//! Unified error type for gateway operations.
//!
//! Every API boundary surfaces the most specific kind; wrapping preserves the
//! cause in the message. Partial-success operations (batch ingestion,
//! broadcast) report per-element outcomes instead of collapsing to one error.

use serde::{Deserialize, Serialize};

/// Result alias used across the gateway crates.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error kinds, mapped onto HTTP statuses at the transport edge.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayError {
    /// Malformed input, size limit, or missing required field. Never retried.
    #[error("validation error: {message}")]
    Validation {
        /// What failed validation.
        message: String,
    },

    /// The event pipeline is at capacity.
    #[error("pipeline at capacity, retry after {retry_after_ms}ms")]
    Backpressure {
        /// Producer retry hint in milliseconds.
        retry_after_ms: u64,
    },

    /// A referenced server, target, or source does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource noun (`server`, `target`, `source`, ...).
        resource: String,
        /// The missing id.
        id: String,
    },

    /// Duplicate registration.
    #[error("{resource} already exists: {id}")]
    Conflict {
        /// Resource noun.
        resource: String,
        /// The conflicting id.
        id: String,
    },

    /// Credential or token acquisition failure.
    #[error("authentication failed: {message}")]
    Auth {
        /// Provider-reported cause.
        message: String,
    },

    /// Network or timeout failure. Retried per policy.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying cause.
        message: String,
    },

    /// Well-formed but error-coded response from a sink or federated server.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Remote status code (HTTP status or gRPC code as reported).
        code: i64,
        /// Remote message, returned verbatim.
        message: String,
        /// Optional structured detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Invariant violation inside the gateway.
    #[error("internal error: {message}")]
    Internal {
        /// Description for the log; not meant for programmatic handling.
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a backpressure error with the default retry hint.
    #[must_use]
    pub fn backpressure() -> Self {
        Self::Backpressure { retry_after_ms: 100 }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an auth error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a remote error.
    #[must_use]
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status for surfacing this error on the inbound API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { message } if message.contains("too large") => 413,
            Self::Validation { .. } => 400,
            Self::Backpressure { .. } => 429,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Auth { .. } => 401,
            Self::Transport { .. } => 502,
            Self::Remote { code, .. } => {
                let code = *code;
                if (400..600).contains(&code) {
                    code as u16
                } else {
                    502
                }
            }
            Self::Internal { .. } => 500,
        }
    }

    /// Whether forwarding may retry after this error.
    ///
    /// Retryable: transport/timeout failures and remote 5xx plus 408/429.
    /// Validation and other 4xx are permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Remote { code, .. } => {
                let code = *code;
                (500..600).contains(&code) || code == 408 || code == 429
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(GatewayError::validation("bad").http_status(), 400);
        assert_eq!(
            GatewayError::validation("event too large").http_status(),
            413
        );
        assert_eq!(GatewayError::backpressure().http_status(), 429);
        assert_eq!(GatewayError::not_found("server", "s1").http_status(), 404);
        assert_eq!(GatewayError::conflict("target", "t1").http_status(), 409);
        assert_eq!(GatewayError::auth("denied").http_status(), 401);
        assert_eq!(GatewayError::transport("refused").http_status(), 502);
        assert_eq!(GatewayError::remote(404, "missing").http_status(), 404);
        assert_eq!(GatewayError::remote(7, "grpc code").http_status(), 502);
        assert_eq!(GatewayError::internal("bug").http_status(), 500);
    }

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::transport("reset").is_retryable());
        assert!(GatewayError::remote(503, "unavailable").is_retryable());
        assert!(GatewayError::remote(429, "slow down").is_retryable());
        assert!(GatewayError::remote(408, "timeout").is_retryable());
        assert!(!GatewayError::remote(400, "bad").is_retryable());
        assert!(!GatewayError::validation("bad").is_retryable());
        assert!(!GatewayError::auth("denied").is_retryable());
    }

    #[test]
    fn error_serializes_with_kind_tag() {
        let err = GatewayError::not_found("server", "s1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"not_found\""));
        let back: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
