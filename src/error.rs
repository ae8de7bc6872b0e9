//! Domain error types for the authorization service.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.
//! Reasons carried by `Unauthenticated`, `Forbidden` and `Conflict` are stable
//! constants exported by the module that raises them.

use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// Application-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Missing, invalid or expired credential
    #[error("Unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// Authenticated, but role, scope or hierarchy does not allow the operation
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    /// Referenced entity has no resolvable current version
    #[error("{0} not found")]
    NotFound(String),

    /// Invariant violation (last owner, self-modification, duplicate grant)
    #[error("Conflict: {0}")]
    Conflict(&'static str),

    /// Store timeout or unavailability; the whole request may be retried
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Unexpected internal failure (hashing, payload decoding)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the whole request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_code, response_message) = match self {
            AppError::Unauthenticated(_) => (
                actix_web::http::StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                self.to_string(),
            ),
            AppError::Forbidden(_) => (
                actix_web::http::StatusCode::FORBIDDEN,
                "FORBIDDEN",
                self.to_string(),
            ),
            AppError::NotFound(_) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                self.to_string(),
            ),
            AppError::Conflict(_) => (
                actix_web::http::StatusCode::CONFLICT,
                "CONFLICT",
                self.to_string(),
            ),
            AppError::Transient(detail) => {
                tracing::warn!("Transient store failure: {}", detail);
                (
                    actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                    "TRANSIENT",
                    "The service is temporarily unavailable, retry the request".to_string(),
                )
            }
            AppError::InvalidInput(_) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                self.to_string(),
            ),
            AppError::Database(err_str) => {
                tracing::error!("Database error: {}", err_str);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            AppError::Internal(err_str) => {
                tracing::error!("Internal error: {}", err_str);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: response_message,
        })
    }
}

/// Error response body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Stored payload could not be decoded: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                AppError::Transient(err.to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("Invalid UUID: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Transient("store call timed out".to_string())
    }
}
