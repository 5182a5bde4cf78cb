use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use narrator::GenerationError;
use serde_json::json;

use crate::storage::StorageError;

/// Error body shared by every route: `{ error, details, timestamp }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request", details)
    }

    pub fn not_found(details: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found", details)
    }

    pub fn forbidden(details: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", details)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{}: {}", self.error, self.details);
        }
        let body = json!({
            "error": self.error,
            "details": self.details,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        let status = match &e {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GenerationError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GenerationError::DidNotConverge { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        Self::new(status, e.label(), e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match &e {
            StorageError::NotFound(_) => Self::not_found(e.to_string()),
            StorageError::InvalidKey(_) => Self::bad_request(e.to_string()),
            StorageError::Io(_) | StorageError::Json(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure", e.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
