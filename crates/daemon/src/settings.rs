//! Daemon settings
//!
//! Read from `QUIVER_*` environment variables, e.g. `QUIVER_BROKER_URL`,
//! `QUIVER_QUEUES=default,images`, `QUIVER_POOL_SIZE=16`. Unset variables
//! keep their defaults.

use anyhow::{Context, Result};
use quiver_core::application::{ReconnectPolicy, WorkerConfig, DEFAULT_MAX_PRIORITY};
use quiver_core::port::MaintenanceConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "QUIVER";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// SQLite URL of the broker database (`sqlite://quiver.db`, `sqlite::memory:`)
    pub broker_url: String,
    pub queues: Vec<String>,
    pub pool_size: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 keeps results until they are consumed
    pub result_ttl_ms: u64,
    pub shutdown_grace_ms: u64,
    pub visibility_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_queue_len: Option<u64>,
    /// Highest honored message priority; larger priorities are clamped to it
    pub max_priority: u8,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub maintenance_interval_secs: u64,
    pub dead_letter_ttl_ms: u64,
    /// Attempts to reach the broker, at startup and after a lost connection
    pub connect_attempts: u32,
    pub log_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_url: "sqlite://quiver.db".to_string(),
            queues: vec!["default".to_string()],
            pool_size: 8,
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
            result_ttl_ms: 600_000,
            shutdown_grace_ms: 5_000,
            visibility_timeout_ms: 300_000,
            poll_interval_ms: 100,
            max_queue_len: None,
            max_priority: DEFAULT_MAX_PRIORITY,
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 9527,
            maintenance_interval_secs: 3_600,
            dead_letter_ttl_ms: 7 * 24 * 60 * 60 * 1000,
            connect_attempts: 6,
            log_format: "pretty".to_string(),
        }
    }
}

impl Settings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from `vars` instead of the process environment when given
    fn load(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("queues")
                    .source(vars),
            )
            .build()
            .context("reading QUIVER_* environment")?
            .try_deserialize()
            .context("invalid QUIVER_* setting")?;

        anyhow::ensure!(
            settings.maintenance_interval_secs > 0,
            "maintenance_interval_secs must be positive"
        );
        settings
            .to_worker_config()
            .validate()
            .context("invalid worker configuration")?;
        Ok(settings)
    }

    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            queues: self.queues.clone(),
            pool_size: self.pool_size,
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            result_ttl: (self.result_ttl_ms > 0).then(|| Duration::from_millis(self.result_ttl_ms)),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_queue_len: self.max_queue_len,
            max_priority: self.max_priority,
            reconnect: self.reconnect_policy(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.connect_attempts,
            ..ReconnectPolicy::default()
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            dead_letter_ttl_ms: i64::try_from(self.dead_letter_ttl_ms).unwrap_or(i64::MAX),
            ..MaintenanceConfig::default()
        }
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}
