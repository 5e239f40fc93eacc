use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use meristem_domain::{DomainError, ErrorCode};
use serde_json::json;

/// HTTP boundary error: a [`DomainError`] rendered as the response
/// envelope `{success:false, error:<CODE>}` with the status fixed by the
/// code table. Stack traces and causes never reach the client.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl ApiError {
    pub fn code(code: ErrorCode) -> Self {
        ApiError(DomainError::new(code))
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        ApiError(DomainError::internal(reason))
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError(e)
    }
}

impl From<meristem_store::StoreError> for ApiError {
    fn from(e: meristem_store::StoreError) -> Self {
        match e {
            meristem_store::StoreError::InvalidCursor => ApiError::code(ErrorCode::InvalidCursor),
            meristem_store::StoreError::TransactionAborted(reason) => ApiError(
                DomainError::new(ErrorCode::TransactionAborted).with_meta("reason", reason),
            ),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "success": false, "error": self.0.code.as_str() }));
        let mut response = (status, body).into_response();
        if self.0.code == ErrorCode::AuditBackpressure {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
