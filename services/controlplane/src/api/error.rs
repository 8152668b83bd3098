//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every RBAC endpoint returns
//! the same `{code, message, requestId}` shape.
//!
//! # Key invariants and assumptions
//! - Error responses carry a stable `code` and a human-readable `message`.
//! - Status codes align with the error category: `not_found` 404,
//!   `validation_error` 400, `conflict` 409, `unauthorized` 401, `internal` 500.
//!
//! # Security considerations
//! - Internal errors are logged server-side; clients get a generic message.
//! - Cross-workspace lookups surface as plain `not_found`.
use crate::api::types::ErrorResponse;
use crate::rbac::RbacError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use keygate_controlplane::api::error::ApiError;
/// use keygate_controlplane::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "role not found".to_string(),
///         request_id: None,
///     },
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        ApiError {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
                request_id: None,
            },
        }
    }

    /// Attach the caller's request id, if one was supplied.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.body.request_id = request_id;
        self
    }
}

impl From<RbacError> for ApiError {
    fn from(err: RbacError) -> Self {
        match err {
            RbacError::NotFound(message) => api_not_found(&message),
            RbacError::BadRequest(message) => api_validation_error(&message),
            RbacError::Conflict(message) => api_conflict("conflict", &message),
            // Already logged with operation context by the service.
            RbacError::Internal(message) => api_internal_message(&message),
        }
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error with a caller-provided code.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, code, message)
}

/// Build a 500 Internal Server Error from a store error.
///
/// Logs the store error and returns a generic message.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "keygate storage error");
    api_internal_message(message)
}

/// Build a 500 Internal Server Error without a store error.
pub fn api_internal_message(message: &str) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error.
pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_helpers_build_expected_codes() {
        let not_found = api_not_found("missing");
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.body.code, "not_found");

        let conflict = api_conflict("conflict", "taken");
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.body.code, "conflict");

        let internal = api_internal_message("oops");
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.code, "internal");

        let unauthorized = api_unauthorized("nope");
        assert_eq!(unauthorized.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unauthorized.body.code, "unauthorized");

        let validation = api_validation_error("bad");
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.body.code, "validation_error");
    }

    #[test]
    fn rbac_errors_map_to_statuses() {
        let cases = [
            (RbacError::NotFound("role not found".into()), StatusCode::NOT_FOUND, "not_found"),
            (
                RbacError::BadRequest("roles not found: r1".into()),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (RbacError::Conflict("role exists".into()), StatusCode::CONFLICT, "conflict"),
            (
                RbacError::Internal("failed to create role".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];
        for (err, status, code) in cases {
            let message = err.to_string();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.body.code, code);
            assert_eq!(api.body.message, message);
        }
    }

    #[test]
    fn api_internal_wraps_store_error() {
        let err = StoreError::Unexpected(anyhow::anyhow!("boom"));
        let api = api_internal("storage unavailable", &err).with_request_id(Some("req-1".into()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.message, "storage unavailable");
        assert_eq!(api.body.request_id.as_deref(), Some("req-1"));
    }
}
