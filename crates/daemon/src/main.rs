//! Quiver daemon - Main Entry Point
//!
//! Worker pool over the SQLite broker, plus the JSON-RPC submission API and
//! periodic storage maintenance.

mod handlers;
mod logging;
mod settings;

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use quiver_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use quiver_core::application::{
    shutdown_channel, BrokerClient, MaintenanceScheduler, Producer, ReconnectPolicy, Results,
    Worker,
};
use quiver_core::port::{SystemTimeProvider, TimeProvider, UuidProvider};
use quiver_infra_sqlite::{SqliteBroker, SqliteMaintenance, SqliteResultStore};

use crate::logging::LogFormat;
use crate::settings::Settings;

/// Bound on waiting for the worker after its own grace period
const WORKER_JOIN_SLACK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    // Settings are read before logging so the format can be configured
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("quiver-daemon: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(LogFormat::parse(&settings.log_format)) {
        eprintln!("quiver-daemon: failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Daemon failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    info!("Quiver daemon v{} starting...", quiver_core::VERSION);

    let worker_config = settings.to_worker_config();
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

    // 1. Broker (retried: the database may live on a volume that is not mounted yet)
    info!(broker_url = %settings.broker_url, "Connecting to broker...");
    let broker = Arc::new(
        connect_with_retry(&settings.broker_url, &worker_config.reconnect, time_provider.clone())
            .await?,
    );
    let pool = broker.shared_pool();

    // 2. DI wiring
    let results_store = Arc::new(SqliteResultStore::new(pool.clone(), time_provider.clone()));
    let maintenance = Arc::new(SqliteMaintenance::new(pool, time_provider.clone()));
    let broker_client = BrokerClient::new(
        broker,
        time_provider.clone(),
        worker_config.broker_options(),
    );
    let producer = Arc::new(Producer::new(
        broker_client.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
        worker_config.task_defaults(),
    ));
    let registry = Arc::new(handlers::builtin_registry()?);

    let worker = Worker::new(
        worker_config.clone(),
        broker_client.clone(),
        registry,
        results_store.clone(),
        time_provider,
    )?;

    // 3. Worker
    info!("Starting worker...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker_token = shutdown_rx.clone();
    let mut worker_handle = tokio::spawn(async move { worker.run(worker_token).await });

    // 4. JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_handler = RpcHandler::new(producer, Results::new(results_store), broker_client);
    let rpc_config = RpcServerConfig {
        host: settings.rpc_host.clone(),
        port: settings.rpc_port,
    };
    let (rpc_addr, rpc_handle) = match RpcServer::new(rpc_config, rpc_handler).start().await {
        Ok(started) => started,
        Err(e) => {
            shutdown_tx.shutdown();
            let _ = tokio::time::timeout(
                worker_config.shutdown_grace + WORKER_JOIN_SLACK,
                worker_handle,
            )
            .await;
            return Err(e).context("RPC server start failed");
        }
    };

    // 5. Maintenance
    let scheduler = MaintenanceScheduler::new(
        maintenance,
        settings.maintenance_config(),
        settings.maintenance_interval(),
    );
    let maintenance_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!(rpc_addr = %rpc_addr, queues = ?worker_config.queues, "System ready. Waiting for tasks...");

    // 6. Run until a signal arrives or the worker gives up
    let worker_exit = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received. Draining...");
            None
        }
        joined = &mut worker_handle => Some(joined),
    };

    // 7. Graceful shutdown
    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }

    let worker_result = match worker_exit {
        Some(joined) => joined,
        None => {
            match tokio::time::timeout(worker_config.shutdown_grace + WORKER_JOIN_SLACK, worker_handle)
                .await
            {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Worker did not stop in time");
                    Ok(Ok(()))
                }
            }
        }
    };
    let _ = maintenance_handle.await;

    worker_result
        .context("worker task panicked")?
        .context("worker stopped")?;

    info!("Shutdown complete.");
    Ok(())
}

/// Open the broker, retrying with the reconnect backoff
async fn connect_with_retry(
    url: &str,
    policy: &ReconnectPolicy,
    time_provider: Arc<dyn TimeProvider>,
) -> Result<SqliteBroker> {
    let mut attempt = 1;
    loop {
        match SqliteBroker::connect(url, time_provider.clone()).await {
            Ok(broker) => return Ok(broker),
            // a bad URL or schema will not fix itself
            Err(e) if !e.is_transport() => {
                return Err(e).context("broker initialization failed");
            }
            Err(e) if attempt >= policy.max_attempts => {
                return Err(e).with_context(|| {
                    format!("broker unreachable after {} attempts", attempt)
                });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Broker unreachable, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("listening for ctrl-c")?,
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("listening for ctrl-c")
    }
}
