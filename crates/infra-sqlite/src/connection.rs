// SQLite Connection Pool Setup

use quiver_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};

const MAX_CONNECTIONS: u32 = 10;

/// Create SQLite connection pool with WAL mode and optimizations
///
/// In-memory databases vanish with their last connection, so their pool is
/// pinned to exactly one connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("Invalid database URL {}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool_options = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(map_transport_error)?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .map_err(map_sqlx_error)?;

    Ok(pool)
}

/// Pool handle shared by every adapter on one database
///
/// The broker swaps the pool on reconnect; holders of a clone see the new one.
#[derive(Clone)]
pub struct SharedPool(Arc<RwLock<SqlitePool>>);

impl SharedPool {
    pub fn new(pool: SqlitePool) -> Self {
        Self(Arc::new(RwLock::new(pool)))
    }

    /// Current pool
    pub async fn get(&self) -> SqlitePool {
        self.0.read().await.clone()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, SqlitePool> {
        self.0.write().await
    }
}

impl From<SqlitePool> for SharedPool {
    fn from(pool: SqlitePool) -> Self {
        Self::new(pool)
    }
}

pub(crate) fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            Some(code) => match code.as_ref() {
                "2067" | "1555" => AppError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}

/// Like [`map_sqlx_error`], but connection-level failures become BrokerUnavailable
///
/// The broker client only reconnects on BrokerUnavailable.
pub(crate) fn map_transport_error(err: sqlx::Error) -> AppError {
    if is_transport_error(&err) {
        AppError::BrokerUnavailable(err.to_string())
    } else {
        map_sqlx_error(err)
    }
}

fn is_transport_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_) => true,
        // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("14"))
        }
        _ => false,
    }
}
