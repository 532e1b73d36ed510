//! Error types for trk-host
//!
//! Maps the common error taxonomy onto HTTP status codes:
//! not found → 404, conflict → 409, validation → 400, everything else → 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - stale version token, job already finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// trk-common error
    #[error("{0}")]
    Common(#[from] trk_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use trk_common::Error as CommonError;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                let (status, code) = match err {
                    CommonError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    CommonError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                    CommonError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    CommonError::Resource(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "RESOURCE_ERROR")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, err.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_common_errors_map_to_http_status() {
        assert_eq!(
            status_of(trk_common::Error::NotFound("x".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(trk_common::Error::Conflict("x".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(trk_common::Error::InvalidInput("x".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(trk_common::Error::Resource("x".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_host_errors_map_to_http_status() {
        assert_eq!(status_of(ApiError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ApiError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ApiError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflict_message_mentions_conflict() {
        let err: ApiError = trk_common::Error::Conflict("version mismatch".into()).into();
        assert!(err.to_string().to_lowercase().contains("conflict"));
    }
}
