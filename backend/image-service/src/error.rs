/// Error types for the image service.
///
/// Pipeline stages report their permanent outcomes through tagged enums in
/// `services::pipeline`; `AppError` covers the transient failures (storage,
/// database, broker I/O) that must surface as a rejected notification so the
/// broker redelivers it.
use thiserror::Error;

/// Result type for image-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Object storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Kafka consumer/offset operation failed
    #[error("Kafka error: {0}")]
    Kafka(String),

    /// Image decode/encode failed
    #[error("Image error: {0}")]
    Image(String),

    /// Configuration is missing or invalid
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}
