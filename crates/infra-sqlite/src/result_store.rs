// SQLite ResultStore Implementation

use crate::connection::{map_sqlx_error, SharedPool};
use async_trait::async_trait;
use quiver_core::domain::{Outcome, TaskResult};
use quiver_core::error::{AppError, Result};
use quiver_core::port::{ResultStore, TimeProvider};
use std::sync::Arc;
use tracing::debug;

/// Result store backed by the `results` table
///
/// Every write is a single-row upsert; writers of different task ids never
/// wait on each other beyond SQLite's own write serialization.
pub struct SqliteResultStore {
    pool: SharedPool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteResultStore {
    pub fn new(pool: impl Into<SharedPool>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool: pool.into(),
            time_provider,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    task_id: String,
    outcome: String,
    created_at: i64,
    expires_at: Option<i64>,
    attempts: i64,
}

impl ResultRow {
    fn into_result(self) -> Result<TaskResult> {
        let outcome: Outcome = serde_json::from_str(&self.outcome).map_err(|e| {
            AppError::Database(format!(
                "Corrupt outcome for task {}: {}",
                self.task_id, e
            ))
        })?;
        Ok(TaskResult {
            task_id: self.task_id,
            outcome,
            created_at: self.created_at,
            expires_at: self.expires_at,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
        })
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn put(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        let outcome = serde_json::to_string(&result.outcome)?;

        sqlx::query(
            r#"
            INSERT INTO results (task_id, outcome, created_at, expires_at, attempts)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                outcome = excluded.outcome,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                attempts = excluded.attempts
            "#,
        )
        .bind(task_id)
        .bind(&outcome)
        .bind(result.created_at)
        .bind(result.expires_at)
        .bind(i64::from(result.attempts))
        .execute(&self.pool.get().await)
        .await
        .map_err(map_sqlx_error)?;

        debug!(task_id = %task_id, success = result.is_success(), "Result stored");
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let now = self.time_provider.now_millis();
        let row = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT task_id, outcome, created_at, expires_at, attempts
            FROM results
            WHERE task_id = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(task_id)
        .bind(now)
        .fetch_optional(&self.pool.get().await)
        .await
        .map_err(map_sqlx_error)?;

        row.map(ResultRow::into_result).transpose()
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM results WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool.get().await)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let purged = sqlx::query("DELETE FROM results WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool.get().await)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use quiver_core::domain::{ArgValue, ErrorDescriptor};
    use quiver_core::port::time_provider::mocks::ManualTimeProvider;

    async fn store_at(now: i64) -> (Arc<ManualTimeProvider>, SqliteResultStore) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let time = Arc::new(ManualTimeProvider::new(now));
        (time.clone(), SqliteResultStore::new(pool, time))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_, store) = store_at(1_000).await;
        let mut kwargs = std::collections::BTreeMap::new();
        kwargs.insert("total".to_string(), ArgValue::Float(2.5));
        let result = TaskResult::succeeded("t1", ArgValue::Map(kwargs), 1_000, 2);

        store.put("t1", &result).await.unwrap();
        assert_eq!(store.get("t1").await.unwrap(), Some(result));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let (_, store) = store_at(1_000).await;
        store
            .put("t1", &TaskResult::succeeded("t1", ArgValue::Int(1), 1_000, 1))
            .await
            .unwrap();
        let failed = TaskResult::failed("t1", ErrorDescriptor::new("ValueError", "bad"), 1_100, 2);
        store.put("t1", &failed).await.unwrap();

        let stored = store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.error().map(|e| e.kind.as_str()), Some("ValueError"));
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_expired_results_are_absent_and_purgeable() {
        let (time, store) = store_at(1_000).await;
        store
            .put("short", &TaskResult::succeeded("short", ArgValue::Null, 1_000, 1).with_ttl(Some(100)))
            .await
            .unwrap();
        store
            .put("forever", &TaskResult::succeeded("forever", ArgValue::Null, 1_000, 1))
            .await
            .unwrap();

        time.advance(100);
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.get("forever").await.unwrap().is_some());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_, store) = store_at(1_000).await;
        store
            .put("t1", &TaskResult::succeeded("t1", ArgValue::Bool(true), 1_000, 1))
            .await
            .unwrap();
        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_distinct_keys() {
        let (_, store) = store_at(1_000).await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("task-{}", i);
                store
                    .put(&id, &TaskResult::succeeded(id.clone(), ArgValue::Int(i), 1_000, 1))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        for i in 0..20 {
            let r = store.get(&format!("task-{}", i)).await.unwrap().unwrap();
            assert_eq!(r.value(), Some(&ArgValue::Int(i)));
        }
    }
}
