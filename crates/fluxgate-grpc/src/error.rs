//! Mapping between gRPC statuses and gateway errors.
//!
//! Transient statuses become [`GatewayError::Transport`] so the forwarding
//! retry policy treats them as retryable; the rest become
//! [`GatewayError::Remote`] carrying an HTTP-convention code, which keeps
//! the retryable set (5xx, 408, 429) consistent across sink kinds.

use tonic::{Code, Status};

use fluxgate_types::GatewayError;

/// Convert a gRPC status into the gateway error it surfaces as.
#[must_use]
pub fn status_to_error(status: &Status) -> GatewayError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Aborted => {
            GatewayError::transport(format!("{}: {}", status.code(), status.message()))
        }
        Code::Unauthenticated => GatewayError::auth(status.message()),
        Code::InvalidArgument | Code::OutOfRange => {
            GatewayError::remote(400, status.message())
        }
        Code::NotFound => GatewayError::remote(404, status.message()),
        Code::PermissionDenied => GatewayError::remote(403, status.message()),
        Code::AlreadyExists => GatewayError::remote(409, status.message()),
        Code::ResourceExhausted => GatewayError::remote(429, status.message()),
        Code::FailedPrecondition => GatewayError::remote(412, status.message()),
        Code::Unimplemented => GatewayError::remote(501, status.message()),
        Code::Internal | Code::DataLoss | Code::Unknown => {
            GatewayError::remote(500, status.message())
        }
        Code::Ok => GatewayError::internal("status Ok treated as error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_map_to_transport() {
        for status in [
            Status::unavailable("down"),
            Status::deadline_exceeded("slow"),
            Status::cancelled("gone"),
            Status::aborted("raced"),
        ] {
            let err = status_to_error(&status);
            assert!(err.is_retryable(), "{status:?} should be retryable");
            assert!(matches!(err, GatewayError::Transport { .. }));
        }
    }

    #[test]
    fn permanent_codes_map_to_remote_4xx() {
        let err = status_to_error(&Status::invalid_argument("bad"));
        assert_eq!(err.http_status(), 400);
        assert!(!err.is_retryable());

        let err = status_to_error(&Status::not_found("missing"));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn resource_exhausted_is_retryable() {
        let err = status_to_error(&Status::resource_exhausted("throttled"));
        assert!(err.is_retryable());
    }

    #[test]
    fn unauthenticated_maps_to_auth() {
        let err = status_to_error(&Status::unauthenticated("who"));
        assert!(matches!(err, GatewayError::Auth { .. }));
    }
}
