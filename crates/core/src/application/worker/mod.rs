// Worker - process-level orchestration of dispatchers and the pool

pub mod config;
pub mod constants;
mod shutdown;

pub use config::WorkerConfig;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::broker_client::BrokerClient;
use crate::application::dispatcher::Dispatcher;
use crate::application::pool::WorkerPool;
use crate::application::registry::HandlerRegistry;
use crate::error::Result;
use crate::port::{ResultStore, TimeProvider};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Worker owning one pool and one dispatcher per serviced queue
pub struct Worker {
    config: WorkerConfig,
    broker: BrokerClient,
    registry: Arc<HandlerRegistry>,
    results: Arc<dyn ResultStore>,
    time_provider: Arc<dyn TimeProvider>,
    pool: Arc<WorkerPool>,
}

impl Worker {
    /// Create a new worker
    ///
    /// # Errors
    /// - AppError::Config if the configuration is invalid
    pub fn new(
        config: WorkerConfig,
        broker: BrokerClient,
        registry: Arc<HandlerRegistry>,
        results: Arc<dyn ResultStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(config.pool_size));
        Ok(Self {
            config,
            broker,
            registry,
            results,
            time_provider,
            pool,
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until shutdown, then drain
    ///
    /// Consumption stops as soon as shutdown fires. In-flight tasks get
    /// `shutdown_grace` to finish; whatever is still running afterwards is
    /// cancelled and its message returned to the queue.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        for queue in &self.config.queues {
            self.broker.declare_queue(queue).await?;
        }

        let mut dispatchers = JoinSet::new();
        for queue in &self.config.queues {
            let dispatcher = Arc::new(Dispatcher::new(
                queue.clone(),
                self.broker.clone(),
                Arc::clone(&self.pool),
                Arc::clone(&self.registry),
                Arc::clone(&self.results),
                self.config.retry_policy(),
                Arc::clone(&self.time_provider),
                self.config.result_ttl_ms(),
            ));
            dispatchers.spawn(dispatcher.run(shutdown.clone()));
        }

        info!(
            queues = ?self.config.queues,
            pool_size = self.config.pool_size,
            functions = ?self.registry.names(),
            "Worker started"
        );

        shutdown.wait().await;
        info!(
            in_flight = self.pool.in_flight(),
            grace_ms = self.config.shutdown_grace.as_millis() as u64,
            "Shutdown requested, draining"
        );

        let drained = tokio::time::timeout(
            self.config.shutdown_grace,
            join_all(&mut dispatchers),
        )
        .await;

        if drained.is_err() {
            let cancelled = self.pool.cancel_all();
            warn!(
                cancelled = cancelled,
                "Grace period elapsed, cancelled tasks returned to the queue"
            );
            join_all(&mut dispatchers).await;
        }

        info!("Worker stopped");
        Ok(())
    }
}

async fn join_all(dispatchers: &mut JoinSet<Result<()>>) {
    while let Some(joined) = dispatchers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Dispatcher failed"),
            Err(e) => error!(error = %e, "Dispatcher crashed"),
        }
    }
}
