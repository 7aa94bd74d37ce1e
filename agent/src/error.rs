//! Unified error handling for the agent.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Local store failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage quota exceeded: {used} of {limit} bytes used")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<fieldsync_engine::Error> for StorageError {
    fn from(err: fieldsync_engine::Error) -> Self {
        match err {
            fieldsync_engine::Error::QuotaExceeded { used, limit } => {
                StorageError::QuotaExceeded { used, limit }
            }
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

/// Status surface error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Storage(StorageError::QuotaExceeded { used, limit }) => {
                tracing::warn!(used, limit, "Rejected write over quota");
                (
                    StatusCode::INSUFFICIENT_STORAGE,
                    "Storage quota exceeded".to_string(),
                    Some(format!("{used} of {limit} bytes used")),
                )
            }
            AppError::Storage(StorageError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, format!("{what} not found"), None)
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                    None,
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
