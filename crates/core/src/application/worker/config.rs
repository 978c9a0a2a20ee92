// Worker configuration

use super::constants::*;
use crate::application::broker_client::{
    BrokerOptions, ReconnectPolicy, DEFAULT_MAX_PRIORITY, DEFAULT_POLL_INTERVAL,
    DEFAULT_VISIBILITY_TIMEOUT,
};
use crate::application::producer::TaskDefaults;
use crate::application::retry::{RetryPolicy, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF};
use crate::domain::{validate_queue_name, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE};
use crate::error::{AppError, Result};
use std::time::Duration;

/// Everything a worker process needs besides its collaborators
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queues serviced by this worker, one dispatcher each
    pub queues: Vec<String>,
    pub pool_size: usize,
    /// Default for tasks sent without an explicit `max_retries`
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// `None` keeps results until consumed
    pub result_ttl: Option<Duration>,
    pub shutdown_grace: Duration,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub max_queue_len: Option<u64>,
    /// Highest message priority honored by the broker (1..=255)
    pub max_priority: u8,
    pub reconnect: ReconnectPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            pool_size: DEFAULT_POOL_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            result_ttl: Some(DEFAULT_RESULT_TTL),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_queue_len: None,
            max_priority: DEFAULT_MAX_PRIORITY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(AppError::Config("at least one queue is required".to_string()));
        }
        for queue in &self.queues {
            validate_queue_name(queue).map_err(|e| AppError::Config(e.to_string()))?;
        }
        let mut unique = self.queues.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.queues.len() {
            return Err(AppError::Config("queues must be unique".to_string()));
        }
        if self.pool_size == 0 {
            return Err(AppError::Config("pool_size must be at least 1".to_string()));
        }
        if self.base_backoff.is_zero() || self.base_backoff > self.max_backoff {
            return Err(AppError::Config(format!(
                "base_backoff ({:?}) must be positive and not above max_backoff ({:?})",
                self.base_backoff, self.max_backoff
            )));
        }
        if self.visibility_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(AppError::Config(
                "visibility_timeout and poll_interval must be positive".to_string(),
            ));
        }
        if self.max_queue_len == Some(0) {
            return Err(AppError::Config("max_queue_len must be positive".to_string()));
        }
        if self.max_priority == 0 {
            return Err(AppError::Config("max_priority must be between 1 and 255".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_backoff, self.max_backoff)
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            visibility_timeout: self.visibility_timeout,
            poll_interval: self.poll_interval,
            max_queue_len: self.max_queue_len,
            max_priority: self.max_priority,
            reconnect: self.reconnect.clone(),
        }
    }

    /// Defaults applied by the producer to tasks sent through this configuration
    pub fn task_defaults(&self) -> TaskDefaults {
        TaskDefaults {
            queue: self
                .queues
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            max_retries: self.max_retries,
            ..TaskDefaults::default()
        }
    }

    pub(crate) fn result_ttl_ms(&self) -> Option<i64> {
        self.result_ttl
            .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.result_ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_result_ttl_beyond_i64_millis_saturates() {
        let config = WorkerConfig {
            result_ttl: Some(Duration::MAX),
            ..WorkerConfig::default()
        };
        assert_eq!(config.result_ttl_ms(), Some(i64::MAX));

        let config = WorkerConfig {
            result_ttl: None,
            ..WorkerConfig::default()
        };
        assert_eq!(config.result_ttl_ms(), None);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = WorkerConfig::default();
        config.queues.clear();
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.queues = vec!["a".into(), "a".into()];
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.base_backoff = Duration::from_secs(600);
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.max_priority = 0;
        assert!(config.validate().is_err());
    }
}
