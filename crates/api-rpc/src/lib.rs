//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 server for remote submission of tasks, pipelines and groups,
//! result lookup, queue statistics and health checks. Binds to localhost only.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
