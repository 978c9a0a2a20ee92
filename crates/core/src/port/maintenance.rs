// Maintenance port
use crate::error::Result;
use async_trait::async_trait;

/// Dead letters are kept this long before being purged (7 days)
pub const DEFAULT_DEAD_LETTER_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub message_count: i64,
    pub dead_letter_count: i64,
    pub result_count: i64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Dead-lettered messages older than this are deleted (ms)
    pub dead_letter_ttl_ms: i64,

    /// Maximum DB size before forcing VACUUM (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            dead_letter_ttl_ms: DEFAULT_DEAD_LETTER_TTL_MS,
            max_db_size_mb: 1000.0, // 1GB max
        }
    }
}

/// Storage maintenance operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Physically delete results past their expiry
    ///
    /// # Returns
    /// Number of results deleted
    async fn purge_expired_results(&self) -> Result<u64>;

    /// Delete dead-lettered messages older than `older_than_ms`
    async fn purge_dead_letters(&self, older_than_ms: i64) -> Result<u64>;

    /// Reclaim space; returns MB reclaimed
    async fn vacuum(&self) -> Result<f64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (purges, then VACUUM if the DB grew past the limit)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        let purged_results = self.purge_expired_results().await?;
        let purged_dead = self.purge_dead_letters(config.dead_letter_ttl_ms).await?;

        let stats_before = self.get_stats().await?;
        let reclaimed_mb = if stats_before.db_size_mb > config.max_db_size_mb {
            self.vacuum().await?
        } else {
            0.0
        };

        let stats_after = self.get_stats().await?;

        tracing::info!(
            purged_results = purged_results,
            purged_dead_letters = purged_dead,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}
