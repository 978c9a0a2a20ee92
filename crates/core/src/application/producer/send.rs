// Send Use Case

use crate::application::broker_client::BrokerClient;
use crate::application::composition::{Group, GroupHandle, Pipeline, PipelineHandle};
use crate::domain::{
    validate_queue_name, Task, TaskArgs, TaskId, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE,
    MAX_PIPELINE_LEN,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Maximum function name length
pub const MAX_FUNCTION_NAME_LEN: usize = 255;

/// Per-task overrides; `None` falls back to [`TaskDefaults`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub queue: Option<String>,
    pub max_retries: Option<u32>,
    pub time_to_live: Option<Duration>,
    /// Deliver no earlier than now + delay
    pub delay: Option<Duration>,
    pub time_limit: Option<Duration>,
    pub store_result: Option<bool>,
    /// Higher goes first; clamped to the broker's maximum
    #[serde(default)]
    pub priority: Option<u8>,
    /// As a pipeline step, do not receive the previous step's result
    #[serde(default)]
    pub pipe_ignore: Option<bool>,
}

impl TaskOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn store_result(mut self, store: bool) -> Self {
        self.store_result = Some(store);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn pipe_ignore(mut self, ignore: bool) -> Self {
        self.pipe_ignore = Some(ignore);
        self
    }
}

/// Option values used when a send does not override them
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefaults {
    pub queue: String,
    pub max_retries: u32,
    pub time_to_live: Option<Duration>,
    pub time_limit: Option<Duration>,
    pub store_result: bool,
    pub priority: u8,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            time_to_live: None,
            time_limit: None,
            store_result: true,
            priority: 0,
        }
    }
}

/// Send request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub function: String,
    #[serde(default)]
    pub args: TaskArgs,
    #[serde(default)]
    pub options: TaskOptions,
}

impl SendRequest {
    pub fn new(function: impl Into<String>, args: TaskArgs) -> Self {
        Self {
            function: function.into(),
            args,
            options: TaskOptions::default(),
        }
    }

    pub fn options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// Validate a send request before anything reaches the broker
pub fn validate_request(req: &SendRequest) -> Result<()> {
    if req.function.is_empty() {
        return Err(AppError::Validation(
            "function name cannot be empty".to_string(),
        ));
    }
    if req.function.len() > MAX_FUNCTION_NAME_LEN {
        return Err(AppError::Validation(format!(
            "function name too long ({} > {} chars)",
            req.function.len(),
            MAX_FUNCTION_NAME_LEN
        )));
    }
    if let Some(queue) = &req.options.queue {
        validate_queue_name(queue)?;
    }
    for (name, value) in [
        ("time_to_live", req.options.time_to_live),
        ("time_limit", req.options.time_limit),
    ] {
        if value.is_some_and(|d| d.is_zero()) {
            return Err(AppError::Validation(format!("{} must be positive", name)));
        }
    }
    req.args.validate()?;
    Ok(())
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Validate `req` and turn it into a task enqueued at `now`
pub fn build_task(
    id_provider: &dyn IdProvider,
    now: i64,
    defaults: &TaskDefaults,
    req: SendRequest,
) -> Result<Task> {
    validate_request(&req)?;

    let options = req.options;
    let queue = options.queue.unwrap_or_else(|| defaults.queue.clone());

    let mut task = Task::new(id_provider.generate_id(), now, queue, req.function, req.args);
    task.max_retries = options.max_retries.unwrap_or(defaults.max_retries);
    task.ttl_ms = options.time_to_live.or(defaults.time_to_live).map(millis);
    task.time_limit_ms = options.time_limit.or(defaults.time_limit).map(millis);
    task.eta = options.delay.map(|d| now.saturating_add(millis(d)));
    task.store_result = options.store_result.unwrap_or(defaults.store_result);
    task.priority = options.priority.unwrap_or(defaults.priority);
    task.pipe_ignore = options.pipe_ignore.unwrap_or(false);
    Ok(task)
}

/// Execute send use case
///
/// # Arguments
///
/// * `broker` - Broker client
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `defaults` - Values for options the request leaves unset
/// * `req` - Send request
pub async fn execute(
    broker: &BrokerClient,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    defaults: &TaskDefaults,
    req: SendRequest,
) -> Result<TaskId> {
    let task = build_task(id_provider, time_provider.now_millis(), defaults, req)?;
    broker.publish(&task).await?;

    info!(
        task_id = %task.id,
        queue = %task.queue,
        function = %task.function,
        eta = ?task.eta,
        priority = task.priority,
        "Task enqueued"
    );

    Ok(task.id)
}

/// Enqueue a pipeline: only its first step is published, the rest ride along
///
/// Every step is validated before anything reaches the broker. Returns the
/// step ids in order.
pub async fn execute_pipeline(
    broker: &BrokerClient,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    defaults: &TaskDefaults,
    pipeline: Pipeline,
) -> Result<PipelineHandle> {
    let head = chain_tasks(id_provider, time_provider.now_millis(), defaults, pipeline)?;
    publish_head(broker, head).await
}

/// Enqueue every member of a group
///
/// Members are validated up front; a publish failure part way leaves the
/// members sent so far enqueued.
pub async fn execute_group(
    broker: &BrokerClient,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    defaults: &TaskDefaults,
    group: Group,
) -> Result<GroupHandle> {
    if group.is_empty() {
        return Err(AppError::Validation("group has no members".to_string()));
    }
    let now = time_provider.now_millis();
    let group_id = id_provider.generate_id();
    let heads = group
        .into_members()
        .into_iter()
        .map(|member| chain_tasks(id_provider, now, defaults, member))
        .collect::<Result<Vec<_>>>()?;

    let mut members = Vec::with_capacity(heads.len());
    for head in heads {
        members.push(publish_head(broker, head).await?);
    }
    info!(group_id = %group_id, members = members.len(), "Group enqueued");
    Ok(GroupHandle { group_id, members })
}

/// Build every step, then nest them last to first under the head
fn chain_tasks(
    id_provider: &dyn IdProvider,
    now: i64,
    defaults: &TaskDefaults,
    pipeline: Pipeline,
) -> Result<Task> {
    if pipeline.is_empty() {
        return Err(AppError::Validation("pipeline has no steps".to_string()));
    }
    if pipeline.len() > MAX_PIPELINE_LEN {
        return Err(AppError::Validation(format!(
            "pipeline too long ({} > {} steps)",
            pipeline.len(),
            MAX_PIPELINE_LEN
        )));
    }
    let mut tasks = pipeline
        .into_steps()
        .into_iter()
        .map(|step| build_task(id_provider, now, defaults, step))
        .collect::<Result<Vec<_>>>()?;

    let mut next: Option<Task> = None;
    while let Some(mut task) = tasks.pop() {
        task.pipe_target = next.map(Box::new);
        next = Some(task);
    }
    let head = next.ok_or_else(|| AppError::Validation("pipeline has no steps".to_string()))?;
    head.validate()?;
    Ok(head)
}

async fn publish_head(broker: &BrokerClient, head: Task) -> Result<PipelineHandle> {
    let task_ids: Vec<TaskId> = std::iter::once(&head)
        .chain(head.successors())
        .map(|task| task.id.clone())
        .collect();
    broker.publish(&head).await?;
    info!(
        task_id = %head.id,
        queue = %head.queue,
        steps = task_ids.len(),
        "Pipeline enqueued"
    );
    Ok(PipelineHandle { task_ids })
}
