// Queue Domain Model

use super::error::{DomainError, Result};

/// Queue identifier
pub type QueueName = String;

/// Name of the queue used when a task does not ask for one
pub const DEFAULT_QUEUE: &str = "default";

/// Maximum queue name length accepted by every backend
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Validate a queue name: non-empty, bounded, `[A-Za-z0-9_.-]` only
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DomainError::InvalidQueueName(
            "queue name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(DomainError::InvalidQueueName(format!(
            "queue name too long ({} > {} chars)",
            name.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(DomainError::InvalidQueueName(format!(
            "queue name must be alphanumeric with '_', '-' or '.': {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_queue_names() {
        assert!(validate_queue_name("default").is_ok());
        assert!(validate_queue_name("emails.high-priority_2").is_ok());
    }

    #[test]
    fn test_invalid_queue_names() {
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name(&"q".repeat(65)).is_err());
        assert!(validate_queue_name("has space").is_err());
        assert!(validate_queue_name("bad@queue!").is_err());
    }
}
