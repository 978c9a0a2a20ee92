// Dispatcher
// Per-queue control loop: consume -> decode -> execute -> record -> settle

use super::broker_client::BrokerClient;
use super::codec;
use super::pool::{ExecutionOutcome, WorkerPool};
use super::registry::HandlerRegistry;
use super::retry::{RetryDecision, RetryPolicy};
use super::worker::ShutdownToken;
use crate::domain::{
    Delivery, DeliveryTag, ErrorDescriptor, Message, Task, TaskLifecycle, TaskResult, TaskState,
};
use crate::error::Result;
use crate::port::{ResultStore, TaskHandler, TimeProvider};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Dispatcher for one queue
///
/// A delivery is acknowledged only after its outcome is recorded: the result
/// is stored (or the retry re-published) first. When recording fails the
/// message is returned to the queue instead.
///
/// A succeeded pipeline step publishes the next step before it is acked. A
/// step that fails for good records a `ParentFailed` result for every step
/// after it.
pub struct Dispatcher {
    queue: String,
    broker: BrokerClient,
    pool: Arc<WorkerPool>,
    registry: Arc<HandlerRegistry>,
    results: Arc<dyn ResultStore>,
    retry_policy: RetryPolicy,
    time_provider: Arc<dyn TimeProvider>,
    result_ttl_ms: Option<i64>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: impl Into<String>,
        broker: BrokerClient,
        pool: Arc<WorkerPool>,
        registry: Arc<HandlerRegistry>,
        results: Arc<dyn ResultStore>,
        retry_policy: RetryPolicy,
        time_provider: Arc<dyn TimeProvider>,
        result_ttl_ms: Option<i64>,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            pool,
            registry,
            results,
            retry_policy,
            time_provider,
            result_ttl_ms,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until shutdown, then wait for every in-flight execution to settle
    ///
    /// Completions are handled in the order executions finish.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) -> Result<()> {
        info!(queue = %self.queue, "Dispatcher started");

        let mut consumer = self.broker.consume(self.queue.clone());
        let mut completions: JoinSet<()> = JoinSet::new();

        while let Some(delivery) = consumer.next(&mut shutdown).await {
            // reap finished completion handlers
            while let Some(Some(joined)) = completions.join_next().now_or_never() {
                log_join_error(joined);
            }

            let Some((message, handler)) = self.prepare(delivery).await else {
                continue;
            };

            let submitted = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    debug!(task_id = %message.task.id, "Shutdown while waiting for a slot, requeueing");
                    self.nack(&message.delivery_tag, true).await;
                    break;
                }
                submitted = self.pool.submit(&message.task, handler) => submitted,
            };

            match submitted {
                Ok(execution) => {
                    let this = Arc::clone(&self);
                    completions.spawn(async move {
                        let outcome = execution.await;
                        let task_id = message.task.id.clone();
                        match this.complete(message, outcome).await {
                            Ok(state) => debug!(task_id = %task_id, state = %state, "Delivery settled"),
                            Err(e) => error!(task_id = %task_id, error = %e, "Completion handling failed"),
                        }
                    });
                }
                Err(e) => {
                    error!(task_id = %message.task.id, error = %e, "Failed to submit task");
                    self.nack(&message.delivery_tag, true).await;
                }
            }
        }

        info!(
            queue = %self.queue,
            in_flight = completions.len(),
            "Dispatcher stopped consuming, draining in-flight tasks"
        );
        while let Some(joined) = completions.join_next().await {
            log_join_error(joined);
        }
        info!(queue = %self.queue, "Dispatcher stopped");
        Ok(())
    }

    /// Decode and vet a delivery; settles it directly when it cannot run
    async fn prepare(&self, delivery: Delivery) -> Option<(Message, Arc<dyn TaskHandler>)> {
        let task = match codec::decode(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    delivery_tag = %delivery.tag,
                    error = %e,
                    "Malformed message, dead-lettering"
                );
                self.nack(&delivery.tag, false).await;
                return None;
            }
        };

        let message = Message {
            task,
            delivery_tag: delivery.tag,
            delivery_count: delivery.delivery_count,
        };
        if message.is_redelivery() {
            info!(
                task_id = %message.task.id,
                delivery_count = message.delivery_count,
                "Redelivered task"
            );
        }

        let now = self.time_provider.now_millis();
        if message.task.is_expired(now) {
            warn!(
                task_id = %message.task.id,
                age_ms = now.saturating_sub(message.task.enqueued_at),
                ttl_ms = ?message.task.ttl_ms,
                "Task expired before execution"
            );
            let error = ErrorDescriptor::new(
                "Expired",
                format!(
                    "message older than its time-to-live of {}ms",
                    message.task.ttl_ms.unwrap_or_default()
                ),
            );
            self.reject(&message, error).await;
            return None;
        }

        match self.registry.get(&message.task.function) {
            Some(handler) => Some((message, handler)),
            None => {
                warn!(
                    task_id = %message.task.id,
                    function = %message.task.function,
                    "No handler registered for function"
                );
                let error = ErrorDescriptor::new(
                    "UnknownFunction",
                    format!("no handler registered for '{}'", message.task.function),
                );
                self.reject(&message, error).await;
                None
            }
        }
    }

    /// Fail a task that never ran: record the failure, then dead-letter
    async fn reject(&self, message: &Message, error: ErrorDescriptor) {
        let task = &message.task;
        if let Err(e) = self.record_failure(task, error, task.retry_count).await {
            error!(task_id = %task.id, error = %e, "Failed to record result, requeueing");
            self.nack(&message.delivery_tag, true).await;
            return;
        }
        self.nack(&message.delivery_tag, false).await;
    }

    /// Store the failure of `task` and of every pipeline step that now never runs
    async fn record_failure(&self, task: &Task, error: ErrorDescriptor, attempts: u32) -> Result<()> {
        let now = self.time_provider.now_millis();
        let cause = format!("{} failed because of {}", task.id, error);
        if task.store_result {
            let result = TaskResult::failed(task.id.clone(), error, now, attempts)
                .with_ttl(self.result_ttl_for(&task.function));
            self.results.put(&task.id, &result).await?;
        }
        for step in task.successors().filter(|step| step.store_result) {
            let result = TaskResult::failed(
                step.id.clone(),
                ErrorDescriptor::new("ParentFailed", cause.clone()),
                now,
                0,
            )
            .with_ttl(self.result_ttl_for(&step.function));
            self.results.put(&step.id, &result).await?;
            debug!(task_id = %step.id, parent_id = %task.id, "Pipeline step marked ParentFailed");
        }
        Ok(())
    }

    /// Result TTL of `function`: its registered override, else the worker-wide TTL
    fn result_ttl_for(&self, function: &str) -> Option<i64> {
        match self.registry.options(function).and_then(|o| o.result_ttl) {
            Some(ttl) => Some(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
            None => self.result_ttl_ms,
        }
    }

    /// Apply an execution outcome; returns the state the task ended this delivery in
    async fn complete(&self, message: Message, outcome: ExecutionOutcome) -> Result<TaskState> {
        let task = &message.task;
        let mut lifecycle = TaskLifecycle::new(task.id.clone());
        lifecycle.start()?;

        let error = match outcome {
            ExecutionOutcome::Succeeded(value) => {
                lifecycle.succeed()?;
                let now = self.time_provider.now_millis();
                let hide_value = self
                    .registry
                    .options(&task.function)
                    .is_some_and(|o| o.pipe_ignore);
                let next = task.pipe_next((!hide_value).then_some(&value), now);
                if task.store_result {
                    let result = TaskResult::succeeded(task.id.clone(), value, now, task.attempt())
                        .with_ttl(self.result_ttl_for(&task.function));
                    if let Err(e) = self.results.put(&task.id, &result).await {
                        error!(task_id = %task.id, error = %e, "Failed to record result, requeueing");
                        self.nack(&message.delivery_tag, true).await;
                        return Ok(TaskState::Pending);
                    }
                }
                if let Some(next) = next {
                    if let Err(e) = self.broker.republish(&next).await {
                        error!(task_id = %task.id, error = %e, "Failed to publish next pipeline step, requeueing");
                        self.nack(&message.delivery_tag, true).await;
                        return Ok(TaskState::Pending);
                    }
                    debug!(task_id = %task.id, next_task_id = %next.id, "Pipeline continued");
                }
                info!(task_id = %task.id, function = %task.function, attempt = task.attempt(), "Task succeeded");
                self.ack(&message.delivery_tag).await;
                return Ok(lifecycle.state());
            }
            ExecutionOutcome::Cancelled => {
                lifecycle.release()?;
                warn!(task_id = %task.id, "Task cancelled, returning to queue");
                self.nack(&message.delivery_tag, true).await;
                return Ok(lifecycle.state());
            }
            ExecutionOutcome::Panicked(ref msg) => {
                error!(task_id = %task.id, panic = %msg, "Task panicked");
                outcome.as_task_error()
            }
            other => other.as_task_error(),
        };
        let Some(error) = error else {
            return Ok(lifecycle.state());
        };

        match self.retry_policy.decide(task, &error) {
            RetryDecision::Retry { delay } => {
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let eta = self.time_provider.now_millis().saturating_add(delay_ms);
                let next = task.next_attempt(eta)?;
                if let Err(e) = self.broker.republish(&next).await {
                    error!(task_id = %task.id, error = %e, "Failed to re-publish retry, requeueing");
                    self.nack(&message.delivery_tag, true).await;
                    return Ok(TaskState::Pending);
                }
                lifecycle.retry()?;
                warn!(
                    task_id = %task.id,
                    error = %error,
                    next_attempt = next.attempt(),
                    "Task failed, retry scheduled"
                );
                self.ack(&message.delivery_tag).await;
            }
            RetryDecision::Failed => {
                lifecycle.fail()?;
                if let Err(e) = self
                    .record_failure(task, error.descriptor(), task.attempt())
                    .await
                {
                    error!(task_id = %task.id, error = %e, "Failed to record result, requeueing");
                    self.nack(&message.delivery_tag, true).await;
                    return Ok(TaskState::Pending);
                }
                error!(
                    task_id = %task.id,
                    function = %task.function,
                    attempts = task.attempt(),
                    error = %error,
                    "Task failed permanently"
                );
                self.nack(&message.delivery_tag, false).await;
            }
        }
        Ok(lifecycle.state())
    }

    async fn ack(&self, tag: &DeliveryTag) {
        if let Err(e) = self.broker.ack(tag).await {
            warn!(delivery_tag = %tag, error = %e, "Ack failed, message may be redelivered");
        }
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) {
        if let Err(e) = self.broker.nack(tag, requeue).await {
            warn!(delivery_tag = %tag, requeue = requeue, error = %e, "Nack failed");
        }
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Completion handler crashed");
    }
}
