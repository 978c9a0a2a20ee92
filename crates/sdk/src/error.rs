//! SDK Error Types
//!
//! Daemon-side failures arrive as JSON-RPC error objects; their code picks
//! the variant so callers can match on what went wrong instead of parsing
//! messages.

use jsonrpsee::core::ClientError;
use thiserror::Error;

/// SDK Result type
pub type Result<T> = std::result::Result<T, SdkError>;

/// Error codes sent by the daemon
pub mod code {
    pub const INVALID_REQUEST: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const QUEUE_FULL: i32 = 4003;
    pub const RESULT_TIMEOUT: i32 = 4004;
    pub const BROKER_UNAVAILABLE: i32 = 5003;
}

#[derive(Debug, Error)]
pub enum SdkError {
    /// The daemon refused the request: empty function name, bad queue name, ...
    #[error("Rejected by daemon: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The queue reached its configured bound; retry later
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// No result appeared within the requested wait
    #[error("Timed out waiting for result: {0}")]
    ResultTimeout(String),

    /// The daemon answered a wait without a result
    #[error("No result for task {task_id}")]
    ResultMissing { task_id: String },

    /// The daemon lost its broker
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Any other daemon-side failure
    #[error("Daemon error ({code}): {message}")]
    Daemon { code: i32, message: String },

    /// The daemon could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SdkError {
    /// Daemon-side code, if the daemon produced this error
    pub fn code(&self) -> Option<i32> {
        match self {
            SdkError::Rejected(_) => Some(code::INVALID_REQUEST),
            SdkError::NotFound(_) => Some(code::NOT_FOUND),
            SdkError::QueueFull(_) => Some(code::QUEUE_FULL),
            SdkError::ResultTimeout(_) => Some(code::RESULT_TIMEOUT),
            SdkError::BrokerUnavailable(_) => Some(code::BROKER_UNAVAILABLE),
            SdkError::Daemon { code, .. } => Some(*code),
            SdkError::ResultMissing { .. } | SdkError::Transport(_) | SdkError::Decode(_) => None,
        }
    }

    /// Whether sending the same request again may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SdkError::QueueFull(_)
                | SdkError::ResultTimeout(_)
                | SdkError::BrokerUnavailable(_)
                | SdkError::Transport(_)
        )
    }

    fn from_code(code: i32, message: String) -> Self {
        match code {
            code::INVALID_REQUEST => SdkError::Rejected(message),
            code::NOT_FOUND => SdkError::NotFound(message),
            code::QUEUE_FULL => SdkError::QueueFull(message),
            code::RESULT_TIMEOUT => SdkError::ResultTimeout(message),
            code::BROKER_UNAVAILABLE => SdkError::BrokerUnavailable(message),
            code => SdkError::Daemon { code, message },
        }
    }
}

impl From<ClientError> for SdkError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Call(call) => SdkError::from_code(call.code(), call.message().to_string()),
            ClientError::ParseError(e) => SdkError::Decode(e),
            ClientError::Transport(e) => SdkError::Transport(e.to_string()),
            ClientError::RestartNeeded(e) => SdkError::Transport(e.to_string()),
            ClientError::RequestTimeout => SdkError::Transport("request timed out".to_string()),
            other => SdkError::Daemon {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::types::ErrorObjectOwned;

    fn call_error(code: i32, message: &str) -> SdkError {
        ClientError::Call(ErrorObjectOwned::owned(code, message, None::<()>)).into()
    }

    #[test]
    fn test_daemon_codes_pick_variants() {
        assert!(matches!(call_error(4000, "empty function"), SdkError::Rejected(_)));
        assert!(matches!(call_error(4003, "default"), SdkError::QueueFull(_)));
        assert!(matches!(call_error(4004, "t1"), SdkError::ResultTimeout(_)));
        assert!(matches!(call_error(5003, "closed"), SdkError::BrokerUnavailable(_)));

        let err = call_error(5001, "locked");
        assert!(matches!(err, SdkError::Daemon { code: 5001, .. }));
        assert_eq!(err.code(), Some(5001));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_errors() {
        assert!(call_error(4003, "default").is_transient());
        assert!(SdkError::Transport("connection refused".into()).is_transient());
        assert!(!call_error(4000, "bad").is_transient());
        assert!(!SdkError::ResultMissing { task_id: "t1".into() }.is_transient());
    }

    #[test]
    fn test_message_is_kept() {
        let err = call_error(4001, "result of task t1");
        assert_eq!(err.to_string(), "Not found: result of task t1");
        assert_eq!(err.code(), Some(code::NOT_FOUND));
    }
}
