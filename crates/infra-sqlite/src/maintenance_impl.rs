// SQLite Maintenance Implementation
use crate::connection::{map_sqlx_error, SharedPool};
use async_trait::async_trait;
use quiver_core::error::{AppError, Result};
use quiver_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use std::sync::Arc;
use tracing::info;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SharedPool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: impl Into<SharedPool>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool: pool.into(),
            time_provider,
        }
    }

    /// Get DB file size in MB
    async fn get_db_size(&self) -> Result<f64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool.get().await)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool.get().await)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        Ok((page_count * page_size) as f64 / (1024.0 * 1024.0))
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool.get().await)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn purge_expired_results(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let deleted = sqlx::query("DELETE FROM results WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool.get().await)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        info!(deleted_results = deleted, "Expired result purge completed");
        Ok(deleted)
    }

    async fn purge_dead_letters(&self, older_than_ms: i64) -> Result<u64> {
        let cutoff_time = self.time_provider.now_millis().saturating_sub(older_than_ms);
        let deleted = sqlx::query("DELETE FROM messages WHERE state = 'DEAD' AND dead_at < ?")
            .bind(cutoff_time)
            .execute(&self.pool.get().await)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        info!(
            cutoff_time = cutoff_time,
            deleted_dead_letters = deleted,
            "Dead letter purge completed"
        );
        Ok(deleted)
    }

    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = self.get_db_size().await?;

        // Reclaims space and defragments
        sqlx::query("VACUUM")
            .execute(&self.pool.get().await)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        Ok(MaintenanceStats {
            db_size_mb: self.get_db_size().await?,
            message_count: self
                .count("SELECT COUNT(*) FROM messages WHERE state != 'DEAD'")
                .await?,
            dead_letter_count: self
                .count("SELECT COUNT(*) FROM messages WHERE state = 'DEAD'")
                .await?,
            result_count: self.count("SELECT COUNT(*) FROM results").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteBroker, SqliteResultStore};
    use quiver_core::domain::{ArgValue, TaskResult};
    use quiver_core::port::maintenance::DEFAULT_DEAD_LETTER_TTL_MS;
    use quiver_core::port::time_provider::mocks::ManualTimeProvider;
    use quiver_core::port::{BrokerBackend, MaintenanceConfig, ResultStore};

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn test_maintenance_stats() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let maintenance = SqliteMaintenance::new(pool, Arc::new(ManualTimeProvider::new(0)));

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.dead_letter_count, 0);
        assert_eq!(stats.result_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let maintenance = SqliteMaintenance::new(pool, Arc::new(ManualTimeProvider::new(0)));

        // VACUUM should not error (even if no space is reclaimed in memory DB)
        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_purge_dead_letters_respects_age() {
        let time = Arc::new(ManualTimeProvider::new(DAY_MS));
        let broker = SqliteBroker::connect("sqlite::memory:", time.clone())
            .await
            .unwrap();
        let maintenance = SqliteMaintenance::new(broker.pool().await, time.clone());

        // dead-lettered on day 1
        broker.publish("default", b"old", DAY_MS, 0, None).await.unwrap();
        let d = broker.fetch("default", 60_000).await.unwrap().unwrap();
        broker.nack(&d.tag, false).await.unwrap();

        // dead-lettered on day 7
        time.set(7 * DAY_MS);
        broker.publish("default", b"new", 7 * DAY_MS, 0, None).await.unwrap();
        let d = broker.fetch("default", 60_000).await.unwrap().unwrap();
        broker.nack(&d.tag, false).await.unwrap();
        broker.publish("default", b"live", 7 * DAY_MS, 0, None).await.unwrap();

        // day 9: only the first is past the 7-day retention
        time.set(9 * DAY_MS);
        assert_eq!(
            maintenance
                .purge_dead_letters(DEFAULT_DEAD_LETTER_TTL_MS)
                .await
                .unwrap(),
            1
        );

        let stats = maintenance.get_stats().await.unwrap();
        assert_eq!(stats.dead_letter_count, 1);
        assert_eq!(stats.message_count, 1);
    }

    #[tokio::test]
    async fn test_full_maintenance_purges_results() {
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteResultStore::new(pool.clone(), time.clone());
        let maintenance = SqliteMaintenance::new(pool, time.clone());

        store
            .put("a", &TaskResult::succeeded("a", ArgValue::Null, 1_000, 1).with_ttl(Some(10)))
            .await
            .unwrap();
        store
            .put("b", &TaskResult::succeeded("b", ArgValue::Null, 1_000, 1))
            .await
            .unwrap();
        time.advance(10);

        let stats = maintenance
            .run_full_maintenance(&MaintenanceConfig::default())
            .await
            .unwrap();
        assert_eq!(stats.result_count, 1);
    }
}
