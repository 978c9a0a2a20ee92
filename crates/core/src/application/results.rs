// Result retrieval for producers

use crate::domain::{TaskId, TaskResult};
use crate::error::{AppError, Result};
use crate::port::ResultStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default interval between store lookups while waiting
pub const DEFAULT_RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Looks up task outcomes, optionally blocking until one is available
#[derive(Clone)]
pub struct Results {
    store: Arc<dyn ResultStore>,
    poll_interval: Duration,
}

impl Results {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_RESULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current result, if any; `forget` deletes it once read
    pub async fn get(&self, task_id: &str, forget: bool) -> Result<Option<TaskResult>> {
        let result = self.store.get(task_id).await?;
        if forget && result.is_some() {
            self.store.delete(task_id).await?;
            debug!(task_id = %task_id, "Result forgotten after read");
        }
        Ok(result)
    }

    /// Wait up to `timeout` for the result of a task
    ///
    /// # Errors
    /// - AppError::ResultTimeout if no result shows up in time
    pub async fn wait(&self, task_id: &str, timeout: Duration, forget: bool) -> Result<TaskResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.get(task_id, forget).await? {
                return Ok(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::ResultTimeout(task_id.to_string()));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Current results of `task_ids`, in the same order
    pub async fn get_many(
        &self,
        task_ids: &[TaskId],
        forget: bool,
    ) -> Result<Vec<Option<TaskResult>>> {
        let mut results = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            results.push(self.get(task_id, forget).await?);
        }
        Ok(results)
    }

    /// How many of `task_ids` have a result
    pub async fn completed_count(&self, task_ids: &[TaskId]) -> Result<usize> {
        let mut count = 0;
        for task_id in task_ids {
            if self.store.get(task_id).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Wait up to `timeout` for every result of a group, returned in order
    ///
    /// With `forget`, results are deleted only once all of them arrived.
    ///
    /// # Errors
    /// - AppError::ResultTimeout naming the first missing task
    pub async fn wait_all(
        &self,
        task_ids: &[TaskId],
        timeout: Duration,
        forget: bool,
    ) -> Result<Vec<TaskResult>> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            let remaining = deadline.saturating_duration_since(Instant::now());
            results.push(self.wait(task_id, remaining, false).await?);
        }
        if forget {
            for task_id in task_ids {
                self.store.delete(task_id).await?;
            }
            debug!(count = task_ids.len(), "Group results forgotten after read");
        }
        Ok(results)
    }
}
