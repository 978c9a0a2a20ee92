// SQLite BrokerBackend Implementation
//
// Messages are rows in `messages`. A fetch leases one row by stamping it with
// a fresh lease token; ack/nack only succeed while that token still holds the
// lease. Rows whose lease ran out are fetched again under a new token.

use crate::connection::{create_pool, is_in_memory, map_transport_error, SharedPool};
use crate::migration::run_migrations;
use async_trait::async_trait;
use quiver_core::domain::{validate_queue_name, Delivery, DeliveryTag, QueueCounts};
use quiver_core::error::{AppError, Result};
use quiver_core::port::{BrokerBackend, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const STATE_READY: &str = "READY";
const STATE_INFLIGHT: &str = "INFLIGHT";
const STATE_DEAD: &str = "DEAD";

#[derive(Debug, sqlx::FromRow)]
struct LeasedRow {
    queue: String,
    body: Vec<u8>,
    delivery_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CountsRow {
    ready: i64,
    delayed: i64,
    in_flight: i64,
    dead: i64,
}

/// Durable broker backend, shareable between processes through one database file
///
/// Consumers in the same process are woken on publish; other processes see
/// new messages on their next poll.
pub struct SqliteBroker {
    database_url: String,
    pool: SharedPool,
    time_provider: Arc<dyn TimeProvider>,
    notify: Notify,
}

impl SqliteBroker {
    pub fn new(
        pool: SqlitePool,
        database_url: impl Into<String>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            pool: SharedPool::new(pool),
            time_provider,
            notify: Notify::new(),
        }
    }

    /// Open (or create) the database and bring its schema up to date
    pub async fn connect(database_url: &str, time_provider: Arc<dyn TimeProvider>) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, database_url, time_provider))
    }

    /// Current connection pool (replaced on reconnect)
    pub async fn pool(&self) -> SqlitePool {
        self.pool.get().await
    }

    /// Handle that follows the pool across reconnects
    ///
    /// Result store and maintenance built from it keep working after the
    /// broker replaces a dead pool.
    pub fn shared_pool(&self) -> SharedPool {
        self.pool.clone()
    }
}

#[async_trait]
impl BrokerBackend for SqliteBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        validate_queue_name(queue)?;
        sqlx::query("INSERT OR IGNORE INTO queues (name, created_at) VALUES (?, ?)")
            .bind(queue)
            .bind(self.time_provider.now_millis())
            .execute(&self.pool().await)
            .await
            .map_err(map_transport_error)?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        available_at: i64,
        priority: u8,
        max_len: Option<u64>,
    ) -> Result<()> {
        let now = self.time_provider.now_millis();
        let pool = self.pool().await;

        let inserted = match max_len {
            // Bound check and insert in one statement, so concurrent publishers cannot overshoot
            Some(limit) => sqlx::query(
                r#"
                INSERT INTO messages (queue, body, state, available_at, priority, created_at)
                SELECT ?1, ?2, ?3, ?4, ?8, ?5
                WHERE (SELECT COUNT(*) FROM messages WHERE queue = ?1 AND state != ?6) < ?7
                "#,
            )
            .bind(queue)
            .bind(body)
            .bind(STATE_READY)
            .bind(available_at)
            .bind(now)
            .bind(STATE_DEAD)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::from(priority))
            .execute(&pool)
            .await
            .map_err(map_transport_error)?
            .rows_affected(),
            None => sqlx::query(
                r#"
                INSERT INTO messages (queue, body, state, available_at, priority, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(queue)
            .bind(body)
            .bind(STATE_READY)
            .bind(available_at)
            .bind(i64::from(priority))
            .bind(now)
            .execute(&pool)
            .await
            .map_err(map_transport_error)?
            .rows_affected(),
        };

        if inserted == 0 {
            return Err(AppError::QueueFull {
                queue: queue.to_string(),
                limit: max_len.unwrap_or_default(),
            });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(&self, queue: &str, visibility_timeout_ms: i64) -> Result<Option<Delivery>> {
        let now = self.time_provider.now_millis();
        let token = uuid::Uuid::new_v4().to_string();

        // Single statement: pick and lease atomically, reclaiming expired leases on the way
        let row = sqlx::query_as::<_, LeasedRow>(
            r#"
            UPDATE messages
            SET state = ?1,
                lease_token = ?2,
                lease_expires_at = ?3,
                delivery_count = delivery_count + 1
            WHERE seq = (
                SELECT seq FROM messages
                WHERE queue = ?4
                  AND ((state = ?5 AND available_at <= ?6)
                       OR (state = ?1 AND lease_expires_at <= ?6))
                ORDER BY priority DESC, available_at, seq
                LIMIT 1
            )
            RETURNING queue, body, delivery_count
            "#,
        )
        .bind(STATE_INFLIGHT)
        .bind(&token)
        .bind(now.saturating_add(visibility_timeout_ms))
        .bind(queue)
        .bind(STATE_READY)
        .bind(now)
        .fetch_optional(&self.pool().await)
        .await
        .map_err(map_transport_error)?;

        Ok(row.map(|row| {
            debug!(queue = %queue, delivery_count = row.delivery_count, "Message leased");
            Delivery {
                tag: DeliveryTag::new(token),
                queue: row.queue,
                body: row.body,
                delivery_count: u32::try_from(row.delivery_count).unwrap_or(u32::MAX),
            }
        }))
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
        let now = self.time_provider.now_millis();
        let deleted = sqlx::query(
            "DELETE FROM messages WHERE lease_token = ? AND state = ? AND lease_expires_at > ?",
        )
        .bind(tag.as_str())
        .bind(STATE_INFLIGHT)
        .bind(now)
        .execute(&self.pool().await)
        .await
        .map_err(map_transport_error)?
        .rows_affected();

        if deleted == 0 {
            return Err(not_leased(tag));
        }
        Ok(())
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()> {
        let now = self.time_provider.now_millis();
        let pool = self.pool().await;

        let settled = if requeue {
            sqlx::query(
                r#"
                UPDATE messages
                SET state = ?1, available_at = ?2, lease_token = NULL, lease_expires_at = NULL
                WHERE lease_token = ?3 AND state = ?4 AND lease_expires_at > ?2
                "#,
            )
            .bind(STATE_READY)
            .bind(now)
            .bind(tag.as_str())
            .bind(STATE_INFLIGHT)
            .execute(&pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE messages
                SET state = ?1, dead_at = ?2, lease_token = NULL, lease_expires_at = NULL
                WHERE lease_token = ?3 AND state = ?4 AND lease_expires_at > ?2
                "#,
            )
            .bind(STATE_DEAD)
            .bind(now)
            .bind(tag.as_str())
            .bind(STATE_INFLIGHT)
            .execute(&pool)
            .await
        };
        let updated = settled.map_err(map_transport_error)?.rows_affected();

        if updated == 0 {
            return Err(not_leased(tag));
        }
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let now = self.time_provider.now_millis();
        let row = sqlx::query_as::<_, CountsRow>(
            r#"
            SELECT
                COALESCE(SUM(CASE
                    WHEN state = ?2 AND available_at <= ?5 THEN 1
                    WHEN state = ?3 AND lease_expires_at <= ?5 THEN 1
                    ELSE 0 END), 0) AS ready,
                COALESCE(SUM(CASE WHEN state = ?2 AND available_at > ?5 THEN 1 ELSE 0 END), 0) AS delayed,
                COALESCE(SUM(CASE WHEN state = ?3 AND lease_expires_at > ?5 THEN 1 ELSE 0 END), 0) AS in_flight,
                COALESCE(SUM(CASE WHEN state = ?4 THEN 1 ELSE 0 END), 0) AS dead
            FROM messages
            WHERE queue = ?1
            "#,
        )
        .bind(queue)
        .bind(STATE_READY)
        .bind(STATE_INFLIGHT)
        .bind(STATE_DEAD)
        .bind(now)
        .fetch_one(&self.pool().await)
        .await
        .map_err(map_transport_error)?;

        Ok(QueueCounts {
            ready: row.ready.max(0) as u64,
            delayed: row.delayed.max(0) as u64,
            in_flight: row.in_flight.max(0) as u64,
            dead: row.dead.max(0) as u64,
        })
    }

    async fn flush(&self, queue: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM messages WHERE queue = ?")
            .bind(queue)
            .execute(&self.pool().await)
            .await
            .map_err(map_transport_error)?
            .rows_affected();
        info!(queue = %queue, removed = removed, "Queue flushed");
        Ok(removed)
    }

    async fn reconnect(&self) -> Result<()> {
        let mut pool = self.pool.write().await;
        if !pool.is_closed() && pool.acquire().await.is_ok() {
            return Ok(());
        }

        if is_in_memory(&self.database_url) {
            warn!("Reconnecting to an in-memory database, previous messages are lost");
        }
        let fresh = create_pool(&self.database_url).await?;
        run_migrations(&fresh).await?;
        pool.close().await;
        *pool = fresh;
        info!("Broker connection re-established");
        Ok(())
    }

    async fn wait_for_message(&self, _queue: &str, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

fn not_leased(tag: &DeliveryTag) -> AppError {
    AppError::InvalidState(format!(
        "delivery {} is unknown, already settled or its lease expired",
        tag
    ))
}
