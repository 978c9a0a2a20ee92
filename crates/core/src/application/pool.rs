// Worker Pool
// Fixed number of execution slots; each execution runs in its own spawned task

use crate::domain::{ArgValue, Task, TaskId};
use crate::error::{AppError, Result};
use crate::port::{TaskError, TaskHandler};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

/// State of one execution slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running { task_id: TaskId },
    /// Last execution errored, panicked, timed out or was cancelled; reused like Idle
    Failed,
}

impl SlotState {
    fn is_free(&self) -> bool {
        !matches!(self, SlotState::Running { .. })
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded(ArgValue),
    Failed(TaskError),
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

impl ExecutionOutcome {
    /// Error to feed into the retry policy, if the attempt failed
    pub fn as_task_error(&self) -> Option<TaskError> {
        match self {
            ExecutionOutcome::Succeeded(_) | ExecutionOutcome::Cancelled => None,
            ExecutionOutcome::Failed(err) => Some(err.clone()),
            ExecutionOutcome::Panicked(msg) => Some(TaskError::retryable("Panic", msg.clone())),
            ExecutionOutcome::TimedOut(limit) => Some(TaskError::retryable(
                "TimeLimitExceeded",
                format!("execution exceeded {}ms", limit.as_millis()),
            )),
        }
    }
}

struct PoolState {
    slots: Vec<SlotState>,
    running: HashMap<usize, AbortHandle>,
}

/// Bounded execution pool
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<PoolState>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            state: Arc::new(Mutex::new(PoolState {
                slots: vec![SlotState::Idle; size],
                running: HashMap::new(),
            })),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of executions currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    /// Snapshot of slot states
    pub fn slots(&self) -> Vec<SlotState> {
        self.state
            .lock()
            .map(|s| s.slots.clone())
            .unwrap_or_default()
    }

    /// Start executing `task` on a free slot, suspending while all slots are busy
    ///
    /// The returned [`Execution`] resolves once the handler finished, failed,
    /// panicked, hit the task's time limit or was cancelled.
    pub async fn submit(&self, task: &Task, handler: Arc<dyn TaskHandler>) -> Result<Execution> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InvalidState("worker pool is closed".to_string()))?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::Internal("pool state lock poisoned".to_string()))?;
        let slot = state
            .slots
            .iter()
            .position(SlotState::is_free)
            .ok_or_else(|| AppError::Internal("no free slot despite permit".to_string()))?;
        state.slots[slot] = SlotState::Running {
            task_id: task.id.clone(),
        };

        let guard = SlotGuard {
            state: Arc::clone(&self.state),
            slot,
            succeeded: false,
        };
        let args = task.args.clone();
        let time_limit = task
            .time_limit_ms
            .map(|ms| Duration::from_millis(ms.max(0) as u64));
        let task_id = task.id.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let mut guard = guard;
            let outcome = match time_limit {
                Some(limit) => match tokio::time::timeout(limit, handler.call(args)).await {
                    Ok(result) => result.into(),
                    Err(_) => ExecutionOutcome::TimedOut(limit),
                },
                None => handler.call(args).await.into(),
            };
            guard.succeeded = matches!(outcome, ExecutionOutcome::Succeeded(_));
            outcome
        });
        state.running.insert(slot, handle.abort_handle());

        debug!(task_id = %task_id, slot = slot, "Execution started");
        Ok(Execution {
            task_id,
            slot,
            handle,
        })
    }

    /// Abort every running execution; returns how many were aborted
    pub fn cancel_all(&self) -> usize {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        for handle in state.running.values() {
            handle.abort();
        }
        let cancelled = state.running.len();
        if cancelled > 0 {
            warn!(cancelled = cancelled, "Cancelled in-flight executions");
        }
        cancelled
    }
}

impl From<std::result::Result<ArgValue, TaskError>> for ExecutionOutcome {
    fn from(result: std::result::Result<ArgValue, TaskError>) -> Self {
        match result {
            Ok(value) => ExecutionOutcome::Succeeded(value),
            Err(err) => ExecutionOutcome::Failed(err),
        }
    }
}

/// Frees the slot when the execution ends, including on panic and abort
struct SlotGuard {
    state: Arc<Mutex<PoolState>>,
    slot: usize,
    succeeded: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.slots[self.slot] = if self.succeeded {
                SlotState::Idle
            } else {
                SlotState::Failed
            };
            state.running.remove(&self.slot);
        }
    }
}

/// Handle to a running execution; a future resolving to its outcome
pub struct Execution {
    task_id: TaskId,
    slot: usize,
    handle: JoinHandle<ExecutionOutcome>,
}

impl Execution {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Future for Execution {
    type Output = ExecutionOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().handle)
            .poll(cx)
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    ExecutionOutcome::Panicked(panic_message(err.into_panic()))
                }
                Err(_) => ExecutionOutcome::Cancelled,
            })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskArgs;
    use crate::port::handler::mocks::{MockBehavior, MockHandler};

    fn task() -> Task {
        Task::new_test("default", "mock", TaskArgs::new())
    }

    #[tokio::test]
    async fn test_success_frees_slot() {
        let pool = WorkerPool::new(2);
        let handler = Arc::new(MockHandler::new(MockBehavior::Succeed(ArgValue::Int(42))));

        let outcome = pool.submit(&task(), handler).await.unwrap().await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded(ArgValue::Int(42)));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.slots(), vec![SlotState::Idle, SlotState::Idle]);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new(1);
        let panicking = Arc::new(MockHandler::new_panic_inducing("kaboom"));

        let outcome = pool.submit(&task(), panicking).await.unwrap().await;
        assert_eq!(outcome, ExecutionOutcome::Panicked("kaboom".to_string()));
        assert_eq!(pool.slots(), vec![SlotState::Failed]);

        // failed slot is reused
        let ok = Arc::new(MockHandler::new_success());
        let outcome = pool.submit(&task(), ok).await.unwrap().await;
        assert!(matches!(outcome, ExecutionOutcome::Succeeded(_)));
        assert_eq!(pool.slots(), vec![SlotState::Idle]);
    }

    #[tokio::test]
    async fn test_time_limit() {
        let pool = WorkerPool::new(1);
        let slow = Arc::new(MockHandler::new_sleep(Duration::from_secs(5)));
        let mut t = task();
        t.time_limit_ms = Some(20);

        let outcome = pool.submit(&t, slow).await.unwrap().await;
        assert_eq!(outcome, ExecutionOutcome::TimedOut(Duration::from_millis(20)));
        assert_eq!(
            outcome.as_task_error().map(|e| e.kind),
            Some("TimeLimitExceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let pool = WorkerPool::new(2);
        let slow = Arc::new(MockHandler::new_sleep(Duration::from_secs(30)));

        let a = pool.submit(&task(), slow.clone()).await.unwrap();
        let b = pool.submit(&task(), slow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.in_flight(), 2);

        assert_eq!(pool.cancel_all(), 2);
        assert_eq!(a.await, ExecutionOutcome::Cancelled);
        assert_eq!(b.await, ExecutionOutcome::Cancelled);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_saturated() {
        let pool = Arc::new(WorkerPool::new(1));
        let slow = Arc::new(MockHandler::new_sleep(Duration::from_millis(100)));

        let first = pool.submit(&task(), slow.clone()).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            pool.submit(&task(), slow.clone()),
        )
        .await;
        assert!(blocked.is_err(), "submit should wait for a free slot");

        first.await;
        let second = pool.submit(&task(), slow).await.unwrap();
        assert!(matches!(second.await, ExecutionOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_size() {
        let pool = Arc::new(WorkerPool::new(3));
        let handler = MockHandler::new_sleep(Duration::from_millis(20));
        let shared: Arc<dyn TaskHandler> = Arc::new(handler.clone());

        let mut executions = Vec::new();
        for _ in 0..12 {
            executions.push(pool.submit(&task(), shared.clone()).await.unwrap());
        }
        for e in executions {
            e.await;
        }
        assert!(handler.peak_concurrency() <= 3);
        assert_eq!(handler.call_count(), 12);
    }
}
