//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorCategory, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request that never reached the saga.
    BadRequest(String),
    /// Saga error, mapped by its category.
    Saga(SagaError),
}

impl ApiError {
    fn category(&self) -> ErrorCategory {
        match self {
            ApiError::BadRequest(_) => ErrorCategory::Validation,
            ApiError::Saga(err) => err.category(),
        }
    }
}

/// Returns the status code for an error category.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation | ErrorCategory::InsufficientStock => StatusCode::BAD_REQUEST,
        ErrorCategory::Referential | ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Infrastructure | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.category();
        let status = status_for(category);
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Saga(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(%category, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message, "category": category });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
