//! JSON-RPC Server
//!
//! Serves the JSON-RPC 2.0 API over HTTP on localhost.

use crate::handler::RpcHandler;
use crate::types::{
    EnqueueRequest, GroupRequest, GroupResultRequest, PipelineRequest, ResultRequest, StatsRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use quiver_core::error::{AppError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Start the JSON-RPC server; returns the bound address and a stop handle
    ///
    /// Security: binds to the configured host, 127.0.0.1 by default (no external access)
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder().build(&addr).await.map_err(|e| {
            AppError::Internal(format!("Failed to build server on {}: {}", addr, e))
        })?;
        let local_addr = server.local_addr()?;

        let module = self.into_module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }

    fn into_module(self) -> Result<RpcModule<()>> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("task.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EnqueueRequest = params.one()?;
                    handler.enqueue(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("pipeline.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PipelineRequest = params.one()?;
                    handler.enqueue_pipeline(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("group.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GroupRequest = params.one()?;
                    handler.enqueue_group(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("group.result.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GroupResultRequest = params.one()?;
                    handler.group_result(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("task.result.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ResultRequest = params.one()?;
                    handler.result(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    // no params means the default queue
                    let req: StatsRequest = params.sequence().optional_next()?.unwrap_or_default();
                    handler.stats(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("health.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.health().await }
            })
            .map_err(register_error)?;

        Ok(module)
    }
}

fn register_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Failed to register RPC method: {}", e))
}
