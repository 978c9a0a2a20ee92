//! Quiver SDK - Rust Client Library
//!
//! Provides a convenient client for submitting tasks to a Quiver daemon and
//! reading back their results.
//!
//! # Example
//!
//! ```no_run
//! use quiver_sdk::{QuiverClient, TaskArgs};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = QuiverClient::connect("http://127.0.0.1:9527").await?;
//!
//!     let task_id = client.send("echo", TaskArgs::positional(["hello"])).await?;
//!     let result = client.wait_result(&task_id, Duration::from_secs(10), true).await?;
//!     println!("{:?}", result.value());
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::QuiverClient;
pub use error::{Result, SdkError};
pub use quiver_core::domain::{ArgValue, Outcome, QueueCounts, TaskArgs, TaskResult};
pub use types::{
    EnqueueRequest, EnqueueResponse, GroupRequest, GroupResponse, GroupResultRequest,
    GroupResultResponse, HealthResponse, PipelineRequest, PipelineResponse, ResultRequest,
    ResultResponse, StatsRequest, StatsResponse,
};
