//! API error types and conversions

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::protocol::ErrorBody;
use crate::store::{StorageError, TopologyError, ValidationError};

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Storage operation failed
    StorageError(String),

    /// Invalid request parameters or body
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// The request conflicts with the current topology (parent cycle)
    Conflict(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::StorageError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<TopologyError> for ApiError {
    fn from(err: TopologyError) -> Self {
        let message = err.to_string();
        match err {
            TopologyError::Validation(ValidationError::CycleDetected { .. }) => {
                ApiError::Conflict(message)
            }
            TopologyError::Validation(_) => ApiError::InvalidRequest(message),
            TopologyError::Storage(StorageError::NotFound { .. }) => ApiError::NotFound(message),
            TopologyError::Storage(StorageError::InvalidDocument(_)) => {
                ApiError::InvalidRequest(message)
            }
            TopologyError::Storage(StorageError::Io(_)) => ApiError::StorageError(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
