//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    EnqueueRequest, EnqueueResponse, GroupRequest, GroupResponse, GroupResultRequest,
    GroupResultResponse, HealthResponse, PipelineRequest, PipelineResponse, ResultRequest,
    ResultResponse, StatsRequest, StatsResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use quiver_core::application::{BrokerClient, Producer, Results};
use quiver_core::domain::{validate_queue_name, TaskResult, TaskState};
use quiver_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest a task.result.v1 call may block
pub const MAX_RESULT_WAIT: Duration = Duration::from_secs(60);

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    producer: Arc<Producer>,
    results: Results,
    broker: BrokerClient,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(producer: Arc<Producer>, results: Results, broker: BrokerClient) -> Self {
        Self {
            producer,
            results,
            broker,
            start_time: Instant::now(),
        }
    }

    /// task.enqueue.v1
    pub async fn enqueue(
        &self,
        params: EnqueueRequest,
    ) -> Result<EnqueueResponse, ErrorObjectOwned> {
        let queue = params
            .queue
            .clone()
            .unwrap_or_else(|| self.producer.defaults().queue.clone());

        let task_id = self
            .producer
            .enqueue(params.into())
            .await
            .map_err(to_rpc_error)?;

        Ok(EnqueueResponse {
            task_id,
            queue,
            state: TaskState::Pending.to_string(),
        })
    }

    /// pipeline.enqueue.v1
    pub async fn enqueue_pipeline(
        &self,
        params: PipelineRequest,
    ) -> Result<PipelineResponse, ErrorObjectOwned> {
        let handle = self
            .producer
            .send_pipeline(params)
            .await
            .map_err(to_rpc_error)?;
        Ok(handle.into())
    }

    /// group.enqueue.v1
    pub async fn enqueue_group(
        &self,
        params: GroupRequest,
    ) -> Result<GroupResponse, ErrorObjectOwned> {
        let handle = self
            .producer
            .send_group(params.into())
            .await
            .map_err(to_rpc_error)?;
        Ok(handle.into())
    }

    /// group.result.v1
    pub async fn group_result(
        &self,
        params: GroupResultRequest,
    ) -> Result<GroupResultResponse, ErrorObjectOwned> {
        let results: Vec<Option<TaskResult>> = match params.wait_ms {
            Some(ms) => {
                let wait = Duration::from_millis(ms).min(MAX_RESULT_WAIT);
                self.results
                    .wait_all(&params.task_ids, wait, params.forget)
                    .await
                    .map_err(to_rpc_error)?
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            None => {
                let results = self
                    .results
                    .get_many(&params.task_ids, false)
                    .await
                    .map_err(to_rpc_error)?;
                // forget only a complete group, like the waiting form does
                if params.forget && results.iter().all(Option::is_some) {
                    self.results
                        .get_many(&params.task_ids, true)
                        .await
                        .map_err(to_rpc_error)?;
                }
                results
            }
        };
        let completed = results.iter().filter(|r| r.is_some()).count();
        debug!(tasks = params.task_ids.len(), completed = completed, "Group result lookup");
        Ok(GroupResultResponse { completed, results })
    }

    /// task.result.v1
    pub async fn result(&self, params: ResultRequest) -> Result<ResultResponse, ErrorObjectOwned> {
        let result = match params.wait_ms {
            Some(ms) => {
                let wait = Duration::from_millis(ms).min(MAX_RESULT_WAIT);
                Some(
                    self.results
                        .wait(&params.task_id, wait, params.forget)
                        .await
                        .map_err(to_rpc_error)?,
                )
            }
            None => self
                .results
                .get(&params.task_id, params.forget)
                .await
                .map_err(to_rpc_error)?,
        };

        debug!(task_id = %params.task_id, found = result.is_some(), "Result lookup");
        Ok(ResultResponse {
            task_id: params.task_id,
            result,
        })
    }

    /// queue.stats.v1
    pub async fn stats(&self, params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let queue = params
            .queue
            .unwrap_or_else(|| self.producer.defaults().queue.clone());
        validate_queue_name(&queue).map_err(|e| to_rpc_error(AppError::from(e)))?;

        let counts = self
            .broker
            .queue_counts(&queue)
            .await
            .map_err(to_rpc_error)?;

        Ok(StatsResponse {
            queue,
            counts,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// health.v1
    pub async fn health(&self) -> Result<HealthResponse, ErrorObjectOwned> {
        Ok(HealthResponse {
            status: "ok".to_string(),
            version: quiver_core::VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use quiver_core::application::{BrokerOptions, TaskDefaults};
    use quiver_core::domain::{ArgValue, TaskArgs, TaskResult};
    use quiver_core::port::{InMemoryBroker, InMemoryResultStore, ResultStore, UuidProvider};
    use quiver_core::port::SystemTimeProvider;

    struct Fixture {
        handler: RpcHandler,
        store: Arc<InMemoryResultStore>,
    }

    fn fixture(max_queue_len: Option<u64>) -> Fixture {
        let time = Arc::new(SystemTimeProvider);
        let broker = BrokerClient::new(
            Arc::new(InMemoryBroker::default()),
            time.clone(),
            BrokerOptions {
                max_queue_len,
                ..BrokerOptions::default()
            },
        );
        let producer = Arc::new(Producer::new(
            broker.clone(),
            Arc::new(UuidProvider),
            time,
            TaskDefaults::default(),
        ));
        let store = Arc::new(InMemoryResultStore::default());
        let results = Results::new(store.clone()).with_poll_interval(Duration::from_millis(5));
        Fixture {
            handler: RpcHandler::new(producer, results, broker),
            store,
        }
    }

    fn request(function: &str) -> EnqueueRequest {
        EnqueueRequest {
            function: function.to_string(),
            args: TaskArgs::positional([1i64, 2]),
            queue: None,
            max_retries: None,
            ttl_ms: None,
            delay_ms: None,
            time_limit_ms: None,
            store_result: None,
            priority: None,
            pipe_ignore: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_stats() {
        let f = fixture(None);
        let response = f.handler.enqueue(request("add")).await.unwrap();
        assert_eq!(response.queue, "default");
        assert_eq!(response.state, "PENDING");
        assert!(!response.task_id.is_empty());

        let stats = f.handler.stats(StatsRequest::default()).await.unwrap();
        assert_eq!(stats.counts.ready, 1);
    }

    #[tokio::test]
    async fn test_enqueue_validation_error() {
        let f = fixture(None);
        let err = f.handler.enqueue(request("")).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let mut bad_queue = request("add");
        bad_queue.queue = Some("no spaces allowed".to_string());
        let err = f.handler.enqueue(bad_queue).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_enqueue_queue_full() {
        let f = fixture(Some(1));
        f.handler.enqueue(request("add")).await.unwrap();
        let err = f.handler.enqueue(request("add")).await.unwrap_err();
        assert_eq!(err.code(), code::QUEUE_FULL);
    }

    #[tokio::test]
    async fn test_result_lookup_and_forget() {
        let f = fixture(None);
        f.store
            .put("t1", &TaskResult::succeeded("t1", ArgValue::Int(3), 0, 1))
            .await
            .unwrap();

        let missing = f
            .handler
            .result(ResultRequest {
                task_id: "nope".to_string(),
                forget: false,
                wait_ms: None,
            })
            .await
            .unwrap();
        assert!(missing.result.is_none());

        let found = f
            .handler
            .result(ResultRequest {
                task_id: "t1".to_string(),
                forget: true,
                wait_ms: None,
            })
            .await
            .unwrap();
        assert_eq!(found.result.unwrap().value(), Some(&ArgValue::Int(3)));
        assert!(f.store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_result_wait_times_out() {
        let f = fixture(None);
        let err = f
            .handler
            .result(ResultRequest {
                task_id: "t1".to_string(),
                forget: false,
                wait_ms: Some(20),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::RESULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_enqueue_pipeline_publishes_head() {
        let f = fixture(None);
        let response = f
            .handler
            .enqueue_pipeline(PipelineRequest {
                steps: vec![request("add"), request("double")],
            })
            .await
            .unwrap();
        assert_eq!(response.task_ids.len(), 2);
        assert_eq!(response.result_id.as_ref(), response.task_ids.last());

        let stats = f.handler.stats(StatsRequest::default()).await.unwrap();
        assert_eq!(stats.counts.ready, 1);

        let err = f
            .handler
            .enqueue_pipeline(PipelineRequest { steps: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_enqueue_group_and_collect_results() {
        let f = fixture(None);
        let response = f
            .handler
            .enqueue_group(GroupRequest {
                members: vec![
                    PipelineRequest {
                        steps: vec![request("add")],
                    },
                    PipelineRequest {
                        steps: vec![request("add"), request("double")],
                    },
                ],
            })
            .await
            .unwrap();
        assert_eq!(response.members.len(), 2);
        let task_ids: Vec<String> = response
            .members
            .iter()
            .filter_map(|m| m.result_id.clone())
            .collect();

        f.store
            .put(&task_ids[0], &TaskResult::succeeded(&task_ids[0], ArgValue::Int(3), 0, 1))
            .await
            .unwrap();
        let partial = f
            .handler
            .group_result(GroupResultRequest {
                task_ids: task_ids.clone(),
                forget: true,
                wait_ms: None,
            })
            .await
            .unwrap();
        assert_eq!(partial.completed, 1);
        assert!(f.store.get(&task_ids[0]).await.unwrap().is_some());

        f.store
            .put(&task_ids[1], &TaskResult::succeeded(&task_ids[1], ArgValue::Int(6), 0, 1))
            .await
            .unwrap();
        let done = f
            .handler
            .group_result(GroupResultRequest {
                task_ids: task_ids.clone(),
                forget: true,
                wait_ms: Some(100),
            })
            .await
            .unwrap();
        assert_eq!(done.completed, 2);
        assert!(f.store.get(&task_ids[1]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture(None);
        let health = f.handler.health().await.unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_stats_rejects_invalid_queue() {
        let f = fixture(None);
        let err = f
            .handler
            .stats(StatsRequest {
                queue: Some(String::new()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }
}
