//! Quiver Client Implementation

use crate::error::{Result, SdkError};
use crate::types::{
    EnqueueRequest, EnqueueResponse, GroupRequest, GroupResponse, GroupResultRequest,
    GroupResultResponse, HealthResponse, PipelineRequest, PipelineResponse, ResultRequest,
    ResultResponse, StatsRequest, StatsResponse,
};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use quiver_core::domain::{TaskArgs, TaskResult};
use std::time::Duration;

/// Covers the longest server-side result wait
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Quiver daemon client
///
/// # Example
///
/// ```no_run
/// use quiver_sdk::QuiverClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = QuiverClient::connect("http://127.0.0.1:9527").await?;
/// assert_eq!(client.health().await?.status, "ok");
/// # Ok(())
/// # }
/// ```
pub struct QuiverClient {
    client: HttpClient,
}

impl QuiverClient {
    /// Connect to a Quiver daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9527`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(url)
            .map_err(|e| SdkError::Transport(format!("Failed to create client for {}: {}", url, e)))?;

        Ok(Self { client })
    }

    /// Submit a task with full control over its options
    ///
    /// ```no_run
    /// # use quiver_sdk::{QuiverClient, EnqueueRequest, TaskArgs};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = QuiverClient::connect("http://127.0.0.1:9527").await?;
    /// let response = client
    ///     .enqueue(
    ///         EnqueueRequest::new("resize", TaskArgs::positional([640i64, 480]))
    ///             .queue("images")
    ///             .max_retries(5),
    ///     )
    ///     .await?;
    /// println!("Task ID: {}", response.task_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse> {
        let params = rpc_params![request];
        let response: EnqueueResponse = self.client.request("task.enqueue.v1", params).await?;

        Ok(response)
    }

    /// Submit a task with default options, returning its id
    pub async fn send(&self, function: impl Into<String>, args: TaskArgs) -> Result<String> {
        Ok(self
            .enqueue(EnqueueRequest::new(function, args))
            .await?
            .task_id)
    }

    /// Submit steps that run one after another
    ///
    /// Each step after the first gets the previous step's result appended to
    /// its positional args, unless it was built with `pipe_ignore`.
    pub async fn enqueue_pipeline(&self, steps: Vec<EnqueueRequest>) -> Result<PipelineResponse> {
        let request = PipelineRequest { steps };
        let response: PipelineResponse = self
            .client
            .request("pipeline.enqueue.v1", rpc_params![request])
            .await?;

        Ok(response)
    }

    /// Submit independent members together; a member with several steps is a pipeline
    pub async fn enqueue_group(&self, members: Vec<Vec<EnqueueRequest>>) -> Result<GroupResponse> {
        let request = GroupRequest {
            members: members
                .into_iter()
                .map(|steps| PipelineRequest { steps })
                .collect(),
        };
        let response: GroupResponse = self
            .client
            .request("group.enqueue.v1", rpc_params![request])
            .await?;

        Ok(response)
    }

    /// Results of several tasks in order, waiting up to `wait` for all of them
    ///
    /// With `forget` the daemon deletes them only once every one is available.
    pub async fn group_results(
        &self,
        task_ids: Vec<String>,
        wait: Option<Duration>,
        forget: bool,
    ) -> Result<GroupResultResponse> {
        let request = GroupResultRequest {
            task_ids,
            forget,
            wait_ms: wait.map(|w| u64::try_from(w.as_millis()).unwrap_or(u64::MAX)),
        };
        let response: GroupResultResponse = self
            .client
            .request("group.result.v1", rpc_params![request])
            .await?;

        Ok(response)
    }

    /// Current result of a task, `None` while it is unfinished
    pub async fn result(&self, task_id: impl Into<String>, forget: bool) -> Result<Option<TaskResult>> {
        let request = ResultRequest {
            task_id: task_id.into(),
            forget,
            wait_ms: None,
        };
        let response: ResultResponse = self
            .client
            .request("task.result.v1", rpc_params![request])
            .await?;

        Ok(response.result)
    }

    /// Block up to `wait` for the result of a task
    ///
    /// The daemon caps the wait at one minute. Fails with
    /// [`SdkError::ResultTimeout`] when no result shows up in time.
    pub async fn wait_result(
        &self,
        task_id: impl Into<String>,
        wait: Duration,
        forget: bool,
    ) -> Result<TaskResult> {
        let task_id = task_id.into();
        let request = ResultRequest {
            task_id: task_id.clone(),
            forget,
            wait_ms: Some(u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)),
        };
        let response: ResultResponse = self
            .client
            .request("task.result.v1", rpc_params![request])
            .await?;

        response
            .result
            .ok_or(SdkError::ResultMissing { task_id })
    }

    /// Message counts of a queue (the daemon's default queue when `None`)
    pub async fn stats(&self, queue: Option<&str>) -> Result<StatsResponse> {
        let request = StatsRequest {
            queue: queue.map(str::to_string),
        };
        let response: StatsResponse = self
            .client
            .request("queue.stats.v1", rpc_params![request])
            .await?;

        Ok(response)
    }

    /// Liveness check
    pub async fn health(&self) -> Result<HealthResponse> {
        let response: HealthResponse = self.client.request("health.v1", rpc_params![]).await?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
    use quiver_core::application::{
        shutdown_channel, BrokerClient, HandlerRegistry, Producer, Results, ShutdownSender,
        Worker, WorkerConfig,
    };
    use quiver_core::domain::ArgValue;
    use quiver_core::port::{
        InMemoryBroker, InMemoryResultStore, SystemTimeProvider, TaskError, UuidProvider,
    };
    use std::sync::Arc;

    struct Daemon {
        url: String,
        shutdown: ShutdownSender,
        server: jsonrpsee::server::ServerHandle,
    }

    /// In-process daemon: RPC server plus a worker with `echo`, `double` and `fail` handlers
    async fn start_daemon() -> Daemon {
        let time = Arc::new(SystemTimeProvider);
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(5),
            max_retries: 0,
            ..WorkerConfig::default()
        };
        let broker = BrokerClient::new(
            Arc::new(InMemoryBroker::default()),
            time.clone(),
            config.broker_options(),
        );
        let store = Arc::new(InMemoryResultStore::default());

        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("echo", |args: TaskArgs| async move {
                Ok(args.arg(0).cloned().unwrap_or(ArgValue::Null))
            })
            .unwrap();
        registry
            .register_fn("double", |args: TaskArgs| async move {
                let n = args.arg(0).and_then(ArgValue::as_i64).unwrap_or(0);
                Ok(ArgValue::Int(n * 2))
            })
            .unwrap();
        registry
            .register_fn("fail", |_args: TaskArgs| async move {
                Err(TaskError::permanent("ValueError", "always fails"))
            })
            .unwrap();

        let worker = Worker::new(
            config.clone(),
            broker.clone(),
            Arc::new(registry),
            store.clone(),
            time.clone(),
        )
        .unwrap();
        let (shutdown, token) = shutdown_channel();
        tokio::spawn(async move { worker.run(token).await });

        let producer = Arc::new(Producer::new(
            broker.clone(),
            Arc::new(UuidProvider),
            time,
            config.task_defaults(),
        ));
        let handler = RpcHandler::new(
            producer,
            Results::new(store).with_poll_interval(Duration::from_millis(5)),
            broker,
        );
        let (addr, server) = RpcServer::new(
            RpcServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            handler,
        )
        .start()
        .await
        .unwrap();

        Daemon {
            url: format!("http://{}", addr),
            shutdown,
            server,
        }
    }

    #[tokio::test]
    async fn test_send_and_wait_for_result() {
        let daemon = start_daemon().await;
        let client = QuiverClient::connect(&daemon.url).await.unwrap();

        assert_eq!(client.health().await.unwrap().status, "ok");

        let task_id = client
            .send("echo", TaskArgs::positional(["hello"]))
            .await
            .unwrap();
        let result = client
            .wait_result(&task_id, Duration::from_secs(5), true)
            .await
            .unwrap();
        assert_eq!(result.value(), Some(&ArgValue::Str("hello".to_string())));

        // forgotten after the first read
        assert!(client.result(&task_id, false).await.unwrap().is_none());

        daemon.shutdown.shutdown();
        daemon.server.stop().unwrap();
    }

    #[tokio::test]
    async fn test_failed_task_reports_error() {
        let daemon = start_daemon().await;
        let client = QuiverClient::connect(&daemon.url).await.unwrap();

        let task_id = client.send("fail", TaskArgs::new()).await.unwrap();
        let result = client
            .wait_result(&task_id, Duration::from_secs(5), false)
            .await
            .unwrap();
        let error = result.error().unwrap();
        assert_eq!(error.kind, "ValueError");
        assert_eq!(error.message, "always fails");

        // the message is dead-lettered right after the result is stored
        let mut dead = 0;
        for _ in 0..100 {
            dead = client.stats(None).await.unwrap().counts.dead;
            if dead == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dead, 1);

        daemon.shutdown.shutdown();
        daemon.server.stop().unwrap();
    }

    #[tokio::test]
    async fn test_pipeline_feeds_results_forward() {
        let daemon = start_daemon().await;
        let client = QuiverClient::connect(&daemon.url).await.unwrap();

        let pipeline = client
            .enqueue_pipeline(vec![
                EnqueueRequest::new("echo", TaskArgs::positional([3i64])),
                EnqueueRequest::new("double", TaskArgs::new()),
                EnqueueRequest::new("double", TaskArgs::new()),
            ])
            .await
            .unwrap();
        let result_id = pipeline.result_id.unwrap();
        let result = client
            .wait_result(&result_id, Duration::from_secs(5), false)
            .await
            .unwrap();
        assert_eq!(result.value(), Some(&ArgValue::Int(12)));

        let broken = client
            .enqueue_pipeline(vec![
                EnqueueRequest::new("fail", TaskArgs::new()),
                EnqueueRequest::new("echo", TaskArgs::new()),
            ])
            .await
            .unwrap();
        let result = client
            .wait_result(broken.result_id.unwrap(), Duration::from_secs(5), false)
            .await
            .unwrap();
        assert_eq!(result.error().unwrap().kind, "ParentFailed");

        daemon.shutdown.shutdown();
        daemon.server.stop().unwrap();
    }

    #[tokio::test]
    async fn test_group_results_arrive_in_member_order() {
        let daemon = start_daemon().await;
        let client = QuiverClient::connect(&daemon.url).await.unwrap();

        let group = client
            .enqueue_group(vec![
                vec![EnqueueRequest::new("echo", TaskArgs::positional([1i64]))],
                vec![
                    EnqueueRequest::new("echo", TaskArgs::positional([2i64])),
                    EnqueueRequest::new("double", TaskArgs::new()),
                ],
            ])
            .await
            .unwrap();
        let done = client
            .group_results(group.result_ids(), Some(Duration::from_secs(5)), true)
            .await
            .unwrap();
        assert_eq!(done.completed, 2);
        let values: Vec<_> = done
            .results
            .iter()
            .map(|r| r.as_ref().and_then(|r| r.value().cloned()))
            .collect();
        assert_eq!(values, vec![Some(ArgValue::Int(1)), Some(ArgValue::Int(4))]);

        let gone = client
            .group_results(group.result_ids(), None, false)
            .await
            .unwrap();
        assert_eq!(gone.completed, 0);

        daemon.shutdown.shutdown();
        daemon.server.stop().unwrap();
    }

    #[tokio::test]
    async fn test_rpc_errors_carry_codes() {
        let daemon = start_daemon().await;
        let client = QuiverClient::connect(&daemon.url).await.unwrap();

        let err = client.send("", TaskArgs::new()).await.unwrap_err();
        assert!(matches!(err, SdkError::Rejected(_)), "{:?}", err);
        assert_eq!(err.code(), Some(4000));

        let err = client
            .wait_result("never-sent", Duration::from_millis(20), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::ResultTimeout(_)), "{:?}", err);
        assert!(err.is_transient());

        daemon.shutdown.shutdown();
        daemon.server.stop().unwrap();
    }
}
