// Quiver Infrastructure - SQLite Adapter
// Implements: BrokerBackend, ResultStore, Maintenance

mod broker;
mod connection;
mod maintenance_impl;
mod migration;
mod result_store;

pub use broker::SqliteBroker;
pub use connection::{create_pool, SharedPool};
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use result_store::SqliteResultStore;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
