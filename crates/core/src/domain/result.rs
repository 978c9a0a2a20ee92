// Task Result Domain Model

use super::task::TaskId;
use super::value::ArgValue;
use serde::{Deserialize, Serialize};

/// Captured failure of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded { value: ArgValue },
    Failed { error: ErrorDescriptor },
}

/// Outcome record of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: Outcome,
    pub created_at: i64,         // epoch ms
    pub expires_at: Option<i64>, // epoch ms, None = kept until deleted
    pub attempts: u32,
}

impl TaskResult {
    pub fn succeeded(task_id: impl Into<String>, value: ArgValue, now: i64, attempts: u32) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: Outcome::Succeeded { value },
            created_at: now,
            expires_at: None,
            attempts,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: ErrorDescriptor,
        now: i64,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: Outcome::Failed { error },
            created_at: now,
            expires_at: None,
            attempts,
        }
    }

    /// Expire `ttl_ms` after creation
    pub fn with_ttl(mut self, ttl_ms: Option<i64>) -> Self {
        self.expires_at = ttl_ms.map(|ttl| self.created_at.saturating_add(ttl));
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_millis)
    }

    pub fn value(&self) -> Option<&ArgValue> {
        match &self.outcome {
            Outcome::Succeeded { value } => Some(value),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            Outcome::Succeeded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry() {
        let result = TaskResult::succeeded("t1", ArgValue::Int(1), 1_000, 1).with_ttl(Some(500));
        assert_eq!(result.expires_at, Some(1_500));
        assert!(!result.is_expired(1_499));
        assert!(result.is_expired(1_500));

        let forever = TaskResult::succeeded("t2", ArgValue::Null, 1_000, 1).with_ttl(None);
        assert!(!forever.is_expired(i64::MAX));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = 1_700_000_000_000;
        let result = TaskResult::succeeded("t1", ArgValue::Int(1), now, 1).with_ttl(Some(i64::MAX));
        assert_eq!(result.expires_at, Some(i64::MAX));
        assert!(!result.is_expired(now + 86_400_000));
    }

    #[test]
    fn test_outcome_accessors() {
        let failed = TaskResult::failed("t1", ErrorDescriptor::new("ValueError", "bad"), 0, 3);
        assert!(!failed.is_success());
        assert!(failed.value().is_none());
        assert_eq!(failed.error().map(|e| e.to_string()), Some("ValueError: bad".to_string()));
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = serde_json::to_value(Outcome::Succeeded {
            value: ArgValue::Bool(true),
        })
        .unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["value"]["type"], "bool");
    }
}
