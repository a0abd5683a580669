//! Error responses for the sync agent API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use marksync_core::StorageError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl From<marksync_core::Error> for ApiError {
    fn from(err: marksync_core::Error) -> Self {
        use marksync_core::Error;

        match err {
            Error::NotFound(id) => ApiError::NotFound(format!("Mutation not found: {}", id)),
            Error::InvalidInput(message) => ApiError::BadRequest(message),
            Error::InvalidState(message) => ApiError::Conflict(message),
            Error::Storage(StorageError::QuotaExceeded(message)) => ApiError::StorageFull(message),
            Error::Storage(StorageError::Unavailable(message)) => ApiError::Unavailable(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Background task failed: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::StorageFull(msg) => {
                tracing::warn!("Storage full: {}", msg);
                (StatusCode::INSUFFICIENT_STORAGE, "storage_full", msg)
            }
            ApiError::Unavailable(msg) => {
                tracing::error!("Storage unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    msg,
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_http_statuses() {
        let cases = [
            (marksync_core::Error::not_found("abc"), StatusCode::NOT_FOUND),
            (
                marksync_core::Error::invalid_state("not failed"),
                StatusCode::CONFLICT,
            ),
            (
                StorageError::quota_exceeded("full").into(),
                StatusCode::INSUFFICIENT_STORAGE,
            ),
            (
                StorageError::backend("disk").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
