use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Backend failures (cache, store, rate limiter) never reach this type: the
/// routing core degrades around them. The only request-level failure that
/// surfaces here is a broken session refresh, which is treated as a hard
/// prerequisite.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Session refresh failed: {0}")]
    SessionRefresh(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            // Internal errors - never expose internal details to clients
            AppError::SessionRefresh(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "session_error",
                    "Unable to verify your session. Please try again.",
                )
            }
            AppError::ConfigError(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_error",
                    "Service configuration error. Please contact support.",
                )
            }

            // Client errors - safe to show the message as it's user-facing
            AppError::NotFound(msg) => {
                tracing::debug!(error = %self, "Not found");
                (StatusCode::NOT_FOUND, "not_found", msg.as_str())
            }
        };

        (status, axum::Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
