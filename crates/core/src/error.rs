// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Codec-level, non-retryable: the message is dead-lettered
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Transport-level: retried with backoff inside the broker client
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Backpressure on publish when a queue bound is configured
    #[error("Queue full: {queue} (limit {limit})")]
    QueueFull { queue: String, limit: u64 },

    #[error("Task execution error: {0}")]
    TaskExecution(#[from] crate::port::TaskError),

    #[error("Timed out waiting for result of task {0}")]
    ResultTimeout(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport errors are the only ones the broker client reconnects on
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::BrokerUnavailable(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String) or AppError::BrokerUnavailable(String)
