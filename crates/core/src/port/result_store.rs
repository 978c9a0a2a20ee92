// Result Store Port

use crate::domain::{TaskId, TaskResult};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence interface for task outcomes, keyed by task id
///
/// Expired results are logically absent: `get` never returns them,
/// `purge_expired` removes them physically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the result of a task
    async fn put(&self, task_id: &str, result: &TaskResult) -> Result<()>;

    /// Fetch a result; `None` when absent or expired
    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>>;

    /// Remove a result; returns whether one existed
    async fn delete(&self, task_id: &str) -> Result<bool>;

    /// Physically remove expired results; returns the number removed
    async fn purge_expired(&self) -> Result<u64>;
}

// ============================================================================
// In-memory store
// ============================================================================

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;
    use std::hash::{Hash, Hasher};
    use std::sync::{Arc, RwLock};

    const SHARDS: usize = 16;

    /// Sharded in-memory result store
    ///
    /// Writers to different shards never contend; there is no store-wide lock.
    pub struct InMemoryResultStore {
        shards: Vec<RwLock<HashMap<TaskId, TaskResult>>>,
        time: Arc<dyn TimeProvider>,
    }

    impl Default for InMemoryResultStore {
        fn default() -> Self {
            Self::new(Arc::new(SystemTimeProvider))
        }
    }

    impl InMemoryResultStore {
        pub fn new(time: Arc<dyn TimeProvider>) -> Self {
            Self {
                shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
                time,
            }
        }

        fn shard(&self, task_id: &str) -> &RwLock<HashMap<TaskId, TaskResult>> {
            let mut hasher = DefaultHasher::new();
            task_id.hash(&mut hasher);
            &self.shards[(hasher.finish() as usize) % SHARDS]
        }

        /// Stored entries, expired ones included
        pub fn len(&self) -> usize {
            self.shards
                .iter()
                .map(|s| s.read().map(|m| m.len()).unwrap_or(0))
                .sum()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    fn poisoned<T>(_: T) -> AppError {
        AppError::Internal("result shard lock poisoned".to_string())
    }

    #[async_trait]
    impl ResultStore for InMemoryResultStore {
        async fn put(&self, task_id: &str, result: &TaskResult) -> Result<()> {
            self.shard(task_id)
                .write()
                .map_err(poisoned)?
                .insert(task_id.to_string(), result.clone());
            Ok(())
        }

        async fn get(&self, task_id: &str) -> Result<Option<TaskResult>> {
            let now = self.time.now_millis();
            let shard = self.shard(task_id).read().map_err(poisoned)?;
            Ok(shard
                .get(task_id)
                .filter(|r| !r.is_expired(now))
                .cloned())
        }

        async fn delete(&self, task_id: &str) -> Result<bool> {
            let removed = self
                .shard(task_id)
                .write()
                .map_err(poisoned)?
                .remove(task_id);
            Ok(removed.is_some())
        }

        async fn purge_expired(&self) -> Result<u64> {
            let now = self.time.now_millis();
            let mut purged = 0;
            for shard in &self.shards {
                let mut map = shard.write().map_err(poisoned)?;
                let before = map.len();
                map.retain(|_, r| !r.is_expired(now));
                purged += (before - map.len()) as u64;
            }
            Ok(purged)
        }
    }
}
