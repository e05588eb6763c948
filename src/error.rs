use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed data: {0}")]
    DataShape(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Coarse classification of a failure, used to decide how loudly a
/// contained failure is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A deadline elapsed.
    Timeout,
    /// The query legitimately matched nothing.
    Empty,
    /// A row or value could not be decoded.
    DataShape,
    /// The shared cache/version store could not be reached.
    CacheUnavailable,
    /// Anything else.
    Fault,
}

impl AppError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            AppError::Timeout(_) => FailureClass::Timeout,
            AppError::NotFound(_) => FailureClass::Empty,
            AppError::DataShape(_) | AppError::InvalidInput(_) => FailureClass::DataShape,
            AppError::Cache(_) | AppError::CacheUnavailable(_) => FailureClass::CacheUnavailable,
            AppError::Database(e) => match e {
                sqlx::Error::RowNotFound => FailureClass::Empty,
                sqlx::Error::PoolTimedOut => FailureClass::Timeout,
                sqlx::Error::ColumnDecode { .. }
                | sqlx::Error::Decode(_)
                | sqlx::Error::ColumnNotFound(_)
                | sqlx::Error::ColumnIndexOutOfBounds { .. }
                | sqlx::Error::TypeNotFound { .. } => FailureClass::DataShape,
                _ => FailureClass::Fault,
            },
            AppError::Internal(_) => FailureClass::Fault,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Timeout(_) => {
                tracing::error!(error = %self, "Request failed on the required path");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "feed temporarily unavailable".to_string(),
                )
            }
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::CacheUnavailable(_)
            | AppError::DataShape(_)
            | AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed on the required path");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
