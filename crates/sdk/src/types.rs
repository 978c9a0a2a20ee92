//! SDK Request/Response Types
//!
//! Mirrors the JSON-RPC types from the api-rpc crate.

use quiver_core::domain::{QueueCounts, TaskArgs, TaskResult};
use serde::{Deserialize, Serialize};

/// Request to submit a task
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueRequest {
    pub function: String,
    pub args: TaskArgs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe_ignore: Option<bool>,
}

impl EnqueueRequest {
    pub fn new(function: impl Into<String>, args: TaskArgs) -> Self {
        Self {
            function: function.into(),
            args,
            ..Self::default()
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// In a pipeline, run with the given args only
    pub fn pipe_ignore(mut self) -> Self {
        self.pipe_ignore = Some(true);
        self
    }
}

/// Response from enqueue operation
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueResponse {
    pub task_id: String,
    pub queue: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRequest {
    pub steps: Vec<EnqueueRequest>,
}

/// Ids of the enqueued steps; `result_id` names the last one
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineResponse {
    pub task_ids: Vec<String>,
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRequest {
    pub members: Vec<PipelineRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupResponse {
    pub group_id: String,
    pub members: Vec<PipelineResponse>,
}

impl GroupResponse {
    /// Result id of every member, in member order
    pub fn result_ids(&self) -> Vec<String> {
        self.members
            .iter()
            .filter_map(|member| member.result_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupResultRequest {
    pub task_ids: Vec<String>,
    pub forget: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupResultResponse {
    pub completed: usize,
    pub results: Vec<Option<TaskResult>>,
}

/// Request to look up a task outcome
#[derive(Debug, Clone, Serialize)]
pub struct ResultRequest {
    pub task_id: String,
    pub forget: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
}

/// Response from result lookup; `result` is None while the task is unfinished
#[derive(Debug, Clone, Deserialize)]
pub struct ResultResponse {
    pub task_id: String,
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Queue statistics
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub queue: String,
    pub counts: QueueCounts,
    pub uptime_seconds: u64,
}

/// Liveness check response
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
