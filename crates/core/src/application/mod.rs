// Application Layer - Use Cases and Business Logic

pub mod broker_client;
pub mod codec;
pub mod composition;
pub mod dispatcher;
pub mod maintenance;
pub mod pool;
pub mod producer;
pub mod registry;
pub mod results;
pub mod retry;
pub mod worker;

// Re-exports
pub use broker_client::{
    BrokerClient, BrokerOptions, Consumer, ReconnectPolicy, DEFAULT_MAX_PRIORITY,
};
pub use composition::{Group, GroupHandle, Pipeline, PipelineHandle};
pub use dispatcher::Dispatcher;
pub use maintenance::MaintenanceScheduler;
pub use pool::{Execution, ExecutionOutcome, SlotState, WorkerPool};
pub use producer::{Producer, SendRequest, TaskDefaults, TaskOptions};
pub use registry::{HandlerOptions, HandlerRegistry};
pub use results::Results;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig};
