// Task Domain Model

use super::error::{DomainError, Result};
use super::queue::{validate_queue_name, QueueName};
use super::value::{ArgValue, TaskArgs};
use serde::{Deserialize, Serialize};

/// Task ID (UUID v4)
pub type TaskId = String;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest chain of pipeline steps a single message may carry
pub const MAX_PIPELINE_LEN: usize = 32;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Retrying,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Succeeded => write!(f, "SUCCEEDED"),
            TaskState::Retrying => write!(f, "RETRYING"),
            TaskState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Task Entity
///
/// Everything here travels on the wire; the lifecycle state is tracked
/// separately by [`TaskLifecycle`] while the task is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub function: String,
    pub args: TaskArgs,
    pub queue: QueueName,
    pub enqueued_at: i64, // epoch ms

    pub retry_count: u32,
    pub max_retries: u32,

    pub ttl_ms: Option<i64>,        // message age limit, measured from enqueued_at
    pub eta: Option<i64>,           // earliest delivery time, epoch ms
    pub time_limit_ms: Option<i64>, // per-attempt execution limit
    pub store_result: bool,

    /// Among deliverable messages of a queue, higher goes first
    #[serde(default)]
    pub priority: u8,
    /// Do not append the previous pipeline step's result to the args
    #[serde(default)]
    pub pipe_ignore: bool,
    /// Next pipeline step, enqueued once this task succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe_target: Option<Box<Task>>,
}

impl Task {
    /// Create a new Task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `enqueued_at` - Enqueue timestamp in epoch ms (injected, not system time)
    /// * `queue` - Queue name
    /// * `function` - Registered handler name
    /// * `args` - Argument payload
    pub fn new(
        id: impl Into<String>,
        enqueued_at: i64,
        queue: impl Into<String>,
        function: impl Into<String>,
        args: TaskArgs,
    ) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            args,
            queue: queue.into(),
            enqueued_at,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            ttl_ms: None,
            eta: None,
            time_limit_ms: None,
            store_result: true,
            priority: 0,
            pipe_ignore: false,
            pipe_target: None,
        }
    }

    /// Create a test task with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (task-1, task-2, ...).
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(queue: impl Into<String>, function: impl Into<String>, args: TaskArgs) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("task-{}", counter);
        let enqueued_at = chrono::Utc::now().timestamp_millis();

        Self::new(id, enqueued_at, queue, function, args)
    }

    /// 1-based number of the current attempt
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Whether another attempt is allowed after the current one fails
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the message outlived its time-to-live
    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.ttl_ms {
            Some(ttl) => now_millis.saturating_sub(self.enqueued_at) > ttl,
            None => false,
        }
    }

    /// Copy of this task for the next attempt, delivered no earlier than `eta`
    pub fn next_attempt(&self, eta: i64) -> Result<Task> {
        if !self.can_retry() {
            return Err(DomainError::ValidationError(format!(
                "task {} exhausted its {} retries",
                self.id, self.max_retries
            )));
        }
        let mut next = self.clone();
        next.retry_count += 1;
        next.eta = Some(eta);
        Ok(next)
    }

    /// Pipeline steps after this one, in execution order
    pub fn successors(&self) -> impl Iterator<Item = &Task> {
        std::iter::successors(self.pipe_target.as_deref(), |task| task.pipe_target.as_deref())
    }

    /// The next pipeline step, ready to publish at `now`
    ///
    /// `previous` is appended as the last positional argument unless the step
    /// opted out. A delay given at build time is kept relative to `now`.
    pub fn pipe_next(&self, previous: Option<&ArgValue>, now: i64) -> Option<Task> {
        let mut next = self.pipe_target.as_deref()?.clone();
        if let Some(eta) = next.eta {
            let delay = eta.saturating_sub(next.enqueued_at).max(0);
            next.eta = Some(now.saturating_add(delay));
        }
        next.enqueued_at = now;
        if let (Some(value), false) = (previous, next.pipe_ignore) {
            next.args.args.push(value.clone());
        }
        Some(next)
    }

    /// Structural validity (what the codec round-trip law quantifies over)
    pub fn validate(&self) -> Result<()> {
        let steps = self.successors().count() + 1;
        if steps > MAX_PIPELINE_LEN {
            return Err(DomainError::ValidationError(format!(
                "pipeline has {} steps (max {})",
                steps, MAX_PIPELINE_LEN
            )));
        }
        self.validate_step()?;
        self.successors().try_for_each(Task::validate_step)
    }

    fn validate_step(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DomainError::ValidationError(
                "task id cannot be empty".to_string(),
            ));
        }
        if self.function.is_empty() {
            return Err(DomainError::ValidationError(
                "function name cannot be empty".to_string(),
            ));
        }
        validate_queue_name(&self.queue)?;
        if self.enqueued_at < 0 {
            return Err(DomainError::ValidationError(format!(
                "enqueue timestamp {} is before the epoch",
                self.enqueued_at
            )));
        }
        if matches!(self.eta, Some(eta) if eta < 0) {
            return Err(DomainError::ValidationError(
                "eta cannot be before the epoch".to_string(),
            ));
        }
        if self.retry_count > self.max_retries {
            return Err(DomainError::ValidationError(format!(
                "retry count {} exceeds max retries {}",
                self.retry_count, self.max_retries
            )));
        }
        if matches!(self.ttl_ms, Some(ttl) if ttl <= 0) {
            return Err(DomainError::ValidationError(
                "time-to-live must be positive".to_string(),
            ));
        }
        if matches!(self.time_limit_ms, Some(limit) if limit <= 0) {
            return Err(DomainError::ValidationError(
                "time limit must be positive".to_string(),
            ));
        }
        self.args.validate()
    }
}

/// Per-delivery lifecycle of a task: `Pending -> Running -> {Succeeded | Retrying | Failed}`
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: TaskId,
    state: TaskState,
}

impl TaskLifecycle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Pending,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskState::Pending, TaskState::Running)
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(TaskState::Running, TaskState::Succeeded)
    }

    pub fn retry(&mut self) -> Result<()> {
        self.transition(TaskState::Running, TaskState::Retrying)
    }

    /// Failed can be reached from Running (attempt failed) or Pending (rejected before execution)
    pub fn fail(&mut self) -> Result<()> {
        match self.state {
            TaskState::Running | TaskState::Pending => {
                self.state = TaskState::Failed;
                Ok(())
            }
            other => Err(invalid(other, TaskState::Failed)),
        }
    }

    /// Running back to Pending: execution was cancelled, the message goes back to the broker
    pub fn release(&mut self) -> Result<()> {
        self.transition(TaskState::Running, TaskState::Pending)
    }

    fn transition(&mut self, from: TaskState, to: TaskState) -> Result<()> {
        if self.state != from {
            return Err(invalid(self.state, to));
        }
        self.state = to;
        Ok(())
    }
}

fn invalid(from: TaskState, to: TaskState) -> DomainError {
    DomainError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
