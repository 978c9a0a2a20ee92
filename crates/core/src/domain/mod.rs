// Domain Layer - Pure business logic and entities

pub mod error;
pub mod message;
pub mod queue;
pub mod result;
pub mod task;
pub mod value;

// Re-exports
pub use error::DomainError;
pub use message::{Delivery, DeliveryTag, Message, QueueCounts};
pub use queue::{validate_queue_name, QueueName, DEFAULT_QUEUE, MAX_QUEUE_NAME_LEN};
pub use result::{ErrorDescriptor, Outcome, TaskResult};
pub use task::{Task, TaskId, TaskLifecycle, TaskState, DEFAULT_MAX_RETRIES, MAX_PIPELINE_LEN};
pub use value::{ArgValue, TaskArgs, MAX_VALUE_DEPTH};
