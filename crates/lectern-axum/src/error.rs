//! Axum-specific error types and HTTP mappings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Gateway HTTP error type.
#[derive(Debug)]
pub enum HttpError {
    /// Resource not found (unknown variant hash, unknown route).
    NotFound(String),

    /// Bad request (missing user identity, malformed parameters).
    BadRequest(String),

    /// The backing store cannot be reached.
    StoreUnavailable(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::StoreUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        let body = ErrorBody { error: message, status: status.as_u16() };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_expected_status_codes() {
        assert_eq!(
            HttpError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HttpError::BadRequest("x".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::StoreUnavailable("x".to_string()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
