//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results. Durations travel as
//! milliseconds.

use quiver_core::application::{
    Group, GroupHandle, Pipeline, PipelineHandle, SendRequest, TaskOptions,
};
use quiver_core::domain::{QueueCounts, TaskArgs, TaskResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// task.enqueue.v1 - Submit a task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnqueueRequest {
    pub function: String,
    #[serde(default)]
    pub args: TaskArgs,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub store_result: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    /// As a pipeline step, leave the previous step's result out of `args`
    #[serde(default)]
    pub pipe_ignore: Option<bool>,
}

impl From<EnqueueRequest> for SendRequest {
    fn from(req: EnqueueRequest) -> Self {
        SendRequest {
            function: req.function,
            args: req.args,
            options: TaskOptions {
                queue: req.queue,
                max_retries: req.max_retries,
                time_to_live: req.ttl_ms.map(Duration::from_millis),
                delay: req.delay_ms.map(Duration::from_millis),
                time_limit: req.time_limit_ms.map(Duration::from_millis),
                store_result: req.store_result,
                priority: req.priority,
                pipe_ignore: req.pipe_ignore,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub task_id: String,
    pub queue: String,
    pub state: String,
}

/// pipeline.enqueue.v1 - Submit steps that run in order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineRequest {
    pub steps: Vec<EnqueueRequest>,
}

impl From<PipelineRequest> for Pipeline {
    fn from(req: PipelineRequest) -> Self {
        req.steps.into_iter().map(SendRequest::from).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub task_ids: Vec<String>,
    /// Task whose result is the pipeline's result
    pub result_id: Option<String>,
}

impl From<PipelineHandle> for PipelineResponse {
    fn from(handle: PipelineHandle) -> Self {
        Self {
            result_id: handle.result_id().cloned(),
            task_ids: handle.task_ids,
        }
    }
}

/// group.enqueue.v1 - Submit independent tasks and pipelines together
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupRequest {
    pub members: Vec<PipelineRequest>,
}

impl From<GroupRequest> for Group {
    fn from(req: GroupRequest) -> Self {
        req.members.into_iter().map(Pipeline::from).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub group_id: String,
    pub members: Vec<PipelineResponse>,
}

impl From<GroupHandle> for GroupResponse {
    fn from(handle: GroupHandle) -> Self {
        Self {
            group_id: handle.group_id,
            members: handle.members.into_iter().map(Into::into).collect(),
        }
    }
}

/// group.result.v1 - Look up the outcomes of several tasks at once
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupResultRequest {
    pub task_ids: Vec<String>,
    /// Delete the results once all of them were read
    #[serde(default)]
    pub forget: bool,
    /// Block up to this long for every result to appear
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResultResponse {
    pub completed: usize,
    pub results: Vec<Option<TaskResult>>,
}

/// task.result.v1 - Look up a task outcome
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultRequest {
    pub task_id: String,
    /// Delete the result once read
    #[serde(default)]
    pub forget: bool,
    /// Block up to this long for the result to appear
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    pub task_id: String,
    pub result: Option<TaskResult>,
}

/// queue.stats.v1 - Message counts of a queue
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatsRequest {
    #[serde(default)]
    pub queue: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub queue: String,
    pub counts: QueueCounts,
    pub uptime_seconds: u64,
}

/// health.v1 - Liveness check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
