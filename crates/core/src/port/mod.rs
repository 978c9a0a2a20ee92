// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod maintenance;
pub mod result_store;
pub mod time_provider;

// Re-exports
pub use broker::memory::InMemoryBroker;
pub use broker::BrokerBackend;
pub use handler::{FnHandler, TaskError, TaskHandler};
pub use id_provider::{IdProvider, UuidProvider};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use result_store::memory::InMemoryResultStore;
pub use result_store::ResultStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
