// Migration Runner

use crate::connection::map_sqlx_error;
use quiver_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Ordered migrations: (version, description, SQL)
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "Message broker",
        include_str!("../migrations/001_message_broker.sql"),
    ),
    (
        2,
        "Result store",
        include_str!("../migrations/002_result_store.sql"),
    ),
    (
        3,
        "Message priority",
        include_str!("../migrations/003_message_priority.sql"),
    ),
];

/// Run database migrations
///
/// Safe to call from several processes sharing one database file: each
/// migration runs in its own transaction and is skipped when another process
/// recorded it first.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = current_version(pool).await?;
    info!(current_version = current_version, "Running database migrations");

    for (version, description, sql) in MIGRATIONS {
        if current_version < *version {
            info!(version = version, description = description, "Applying migration");
            if !apply_migration(pool, *version, sql).await? {
                info!(version = version, "Migration already applied elsewhere");
            }
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// Apply a single migration SQL file; false when it was already recorded
async fn apply_migration(pool: &SqlitePool, version: i64, sql: &str) -> Result<bool> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    // schema_version itself comes with the first migration
    if version > 1 {
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version WHERE version = ?")
            .bind(version)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if applied > 0 {
            return Ok(false);
        }
    }

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in ["messages", "queues", "results"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "table {} should exist and be empty", table);
        }
        assert_eq!(current_version(&pool).await.unwrap(), 3);

        let priority: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('messages') WHERE name = 'priority'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(priority, 1);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn test_recorded_migration_is_skipped() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        // a second ALTER TABLE would fail on the duplicate column
        let (version, _, sql) = MIGRATIONS[2];
        assert!(!apply_migration(&pool, version, sql).await.unwrap());
    }
}
