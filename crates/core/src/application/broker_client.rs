// Broker Client
// Codec + reconnect handling on top of a BrokerBackend

use super::codec;
use super::worker::ShutdownToken;
use crate::domain::{validate_queue_name, Delivery, DeliveryTag, QueueCounts, Task};
use crate::error::Result;
use crate::port::{BrokerBackend, TimeProvider};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Give up on a broker operation after this many reconnects
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 6;

/// Default visibility timeout of a delivery (5 minutes)
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default interval between polls of an idle queue
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default highest message priority; task priorities above it are clamped
pub const DEFAULT_MAX_PRIORITY: u8 = 10;

/// Upper bound of the consumer backoff after repeated fetch errors
const MAX_CONSUMER_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded, jittered exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(31)))
            .min(self.cap);
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::try_from_secs_f64(exp.as_secs_f64() * factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

/// Broker client options
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    /// Publish fails with QueueFull once a queue holds this many messages
    pub max_queue_len: Option<u64>,
    pub max_priority: u8,
    pub reconnect: ReconnectPolicy,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_queue_len: None,
            max_priority: DEFAULT_MAX_PRIORITY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Publishes and consumes tasks; shared by all dispatchers of a worker
#[derive(Clone)]
pub struct BrokerClient {
    backend: Arc<dyn BrokerBackend>,
    time_provider: Arc<dyn TimeProvider>,
    options: BrokerOptions,
    reconnect_lock: Arc<Mutex<()>>,
}

impl BrokerClient {
    pub fn new(
        backend: Arc<dyn BrokerBackend>,
        time_provider: Arc<dyn TimeProvider>,
        options: BrokerOptions,
    ) -> Self {
        Self {
            backend,
            time_provider,
            options,
            reconnect_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    pub fn time_provider(&self) -> &Arc<dyn TimeProvider> {
        &self.time_provider
    }

    /// Create a queue (idempotent)
    pub async fn declare_queue(&self, queue: &str) -> Result<()> {
        validate_queue_name(queue)?;
        let backend = &self.backend;
        self.with_reconnect("declare_queue", None, move || backend.declare_queue(queue))
            .await
    }

    /// Encode and enqueue a task on its queue, deliverable at its ETA
    ///
    /// # Errors
    /// - AppError::QueueFull when `max_queue_len` is reached
    /// - AppError::BrokerUnavailable after all reconnect attempts failed
    pub async fn publish(&self, task: &Task) -> Result<()> {
        self.publish_task(task, self.options.max_queue_len).await
    }

    /// Re-enqueue a task for another attempt; not subject to the queue bound
    pub async fn republish(&self, task: &Task) -> Result<()> {
        self.publish_task(task, None).await
    }

    async fn publish_task(&self, task: &Task, max_len: Option<u64>) -> Result<()> {
        let body = codec::encode(task)?;
        let available_at = task
            .eta
            .unwrap_or_else(|| self.time_provider.now_millis());
        let priority = task.priority.min(self.options.max_priority);
        self.publish_raw(&task.queue, &body, available_at, priority, max_len)
            .await?;
        debug!(
            task_id = %task.id,
            queue = %task.queue,
            function = %task.function,
            retry_count = task.retry_count,
            priority = priority,
            "Task published"
        );
        Ok(())
    }

    /// Enqueue already-encoded bytes
    pub async fn publish_raw(
        &self,
        queue: &str,
        body: &[u8],
        available_at: i64,
        priority: u8,
        max_len: Option<u64>,
    ) -> Result<()> {
        let backend = &self.backend;
        self.with_reconnect("publish", None, move || {
            backend.publish(queue, body, available_at, priority, max_len)
        })
        .await
    }

    /// Lease the next deliverable message, if any
    pub async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        self.fetch_with(queue, None).await
    }

    /// Reconnect backoff is cut short when `shutdown` fires
    async fn fetch_with(
        &self,
        queue: &str,
        shutdown: Option<ShutdownToken>,
    ) -> Result<Option<Delivery>> {
        let backend = &self.backend;
        let visibility_ms =
            i64::try_from(self.options.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        self.with_reconnect("fetch", shutdown, move || {
            backend.fetch(queue, visibility_ms)
        })
        .await
    }

    pub async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
        let backend = &self.backend;
        self.with_reconnect("ack", None, move || backend.ack(tag)).await
    }

    /// `requeue = false` dead-letters the message
    pub async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()> {
        let backend = &self.backend;
        self.with_reconnect("nack", None, move || backend.nack(tag, requeue))
            .await
    }

    pub async fn queue_counts(&self, queue: &str) -> Result<QueueCounts> {
        let backend = &self.backend;
        self.with_reconnect("counts", None, move || backend.counts(queue))
            .await
    }

    /// Drop every message of a queue
    pub async fn flush(&self, queue: &str) -> Result<u64> {
        let backend = &self.backend;
        let removed = self
            .with_reconnect("flush", None, move || backend.flush(queue))
            .await?;
        info!(queue = %queue, removed = removed, "Queue flushed");
        Ok(removed)
    }

    /// Lazy stream of deliveries from `queue`
    pub fn consume(&self, queue: impl Into<String>) -> Consumer {
        Consumer {
            client: self.clone(),
            queue: queue.into(),
        }
    }

    /// Retry transport errors with backoff; a fired `shutdown` returns the last error
    async fn with_reconnect<T, F, Fut>(
        &self,
        op: &str,
        mut shutdown: Option<ShutdownToken>,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.options.reconnect;
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempt < policy.max_attempts => {
                    attempt += 1;
                    let delay = policy.delay(attempt);
                    warn!(
                        op = op,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker unavailable, reconnecting"
                    );
                    match shutdown.as_mut() {
                        Some(token) => tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = token.wait() => {
                                debug!(op = op, "Shutdown during reconnect backoff");
                                return Err(e);
                            }
                        },
                        None => tokio::time::sleep(delay).await,
                    }

                    let _guard = self.reconnect_lock.lock().await;
                    if let Err(err) = self.backend.reconnect().await {
                        debug!(op = op, error = %err, "Reconnect failed");
                    }
                }
                Err(e) => {
                    if e.is_transport() {
                        error!(op = op, attempts = attempt, error = %e, "Broker unreachable, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Restartable, unbounded sequence of deliveries from one queue
pub struct Consumer {
    client: BrokerClient,
    queue: String,
}

impl Consumer {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery; suspends while the queue is empty, `None` once shutdown fires
    pub async fn next(&mut self, shutdown: &mut ShutdownToken) -> Option<Delivery> {
        let poll_interval = self.client.options.poll_interval;
        let mut consecutive_errors: u32 = 0;

        loop {
            if shutdown.is_shutdown() {
                return None;
            }

            match self.client.fetch_with(&self.queue, Some(shutdown.clone())).await {
                Ok(Some(delivery)) => {
                    if consecutive_errors > 0 {
                        info!(queue = %self.queue, "Broker recovered after {} errors", consecutive_errors);
                    }
                    return Some(delivery);
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    tokio::select! {
                        _ = self.client.backend.wait_for_message(&self.queue, poll_interval) => {}
                        _ = shutdown.wait() => return None,
                    }
                }
                Err(_) if shutdown.is_shutdown() => return None,
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = poll_interval
                        .saturating_mul(2u32.saturating_pow(consecutive_errors.min(8)))
                        .min(MAX_CONSUMER_BACKOFF);
                    error!(
                        queue = %self.queue,
                        consecutive_errors = consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Fetch failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.wait() => return None,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::TaskArgs;
    use crate::error::AppError;
    use crate::port::{InMemoryBroker, SystemTimeProvider};

    fn fast_options() -> BrokerOptions {
        BrokerOptions {
            poll_interval: Duration::from_millis(10),
            reconnect: ReconnectPolicy {
                max_attempts: 3,
                base: Duration::from_millis(1),
                cap: Duration::from_millis(5),
            },
            ..BrokerOptions::default()
        }
    }

    fn client(broker: Arc<InMemoryBroker>) -> BrokerClient {
        BrokerClient::new(broker, Arc::new(SystemTimeProvider), fast_options())
    }

    #[test]
    fn test_reconnect_delay_bounded() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..20 {
            assert!(policy.delay(attempt) <= policy.cap);
        }
        assert!(policy.delay(1) <= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = Arc::new(InMemoryBroker::default());
        let client = client(broker);
        let task = Task::new_test("default", "echo", TaskArgs::positional([1]));

        client.declare_queue("default").await.unwrap();
        client.publish(&task).await.unwrap();

        let (_tx, mut shutdown) = shutdown_channel();
        let mut consumer = client.consume("default");
        let delivery = consumer.next(&mut shutdown).await.unwrap();
        assert_eq!(codec::decode(&delivery.body).unwrap(), task);

        client.ack(&delivery.tag).await.unwrap();
        assert_eq!(client.queue_counts("default").await.unwrap().pending(), 0);
    }

    #[tokio::test]
    async fn test_priority_clamped_to_max() {
        let broker = Arc::new(InMemoryBroker::default());
        let mut options = fast_options();
        options.max_priority = 3;
        let client = BrokerClient::new(broker, Arc::new(SystemTimeProvider), options);

        let mut urgent = Task::new_test("default", "echo", TaskArgs::new());
        urgent.priority = 200;
        let mut high = Task::new_test("default", "echo", TaskArgs::new());
        high.priority = 3;
        client.publish(&urgent).await.unwrap();
        client.publish(&high).await.unwrap();

        // both land on priority 3, so publish order decides
        let first = client.fetch("default").await.unwrap().unwrap();
        assert_eq!(codec::decode(&first.body).unwrap().id, urgent.id);
    }

    #[tokio::test]
    async fn test_invalid_queue_name_rejected() {
        let client = client(Arc::new(InMemoryBroker::default()));
        assert!(client.declare_queue("bad queue").await.is_err());
    }

    #[tokio::test]
    async fn test_consumer_returns_none_on_shutdown() {
        let client = client(Arc::new(InMemoryBroker::default()));
        let (tx, mut shutdown) = shutdown_channel();
        let mut consumer = client.consume("empty");

        let waiter = tokio::spawn(async move { consumer.next(&mut shutdown).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.shutdown();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_backoff() {
        let broker = Arc::new(InMemoryBroker::default());
        let options = BrokerOptions {
            reconnect: ReconnectPolicy {
                max_attempts: 100,
                base: Duration::from_secs(30),
                cap: Duration::from_secs(60),
            },
            ..fast_options()
        };
        let client = BrokerClient::new(broker.clone(), Arc::new(SystemTimeProvider), options);
        broker.set_available(false);

        let (tx, mut shutdown) = shutdown_channel();
        let mut consumer = client.consume("default");
        let waiter = tokio::spawn(async move { consumer.next(&mut shutdown).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.shutdown();

        let next = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("consumer kept sleeping through shutdown")
            .unwrap();
        assert!(next.is_none());
        assert_eq!(broker.reconnect_attempts(), 0);
    }

    #[test]
    fn test_reconnect_delay_with_unbounded_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            base: Duration::MAX,
            cap: Duration::MAX,
        };
        assert!(policy.delay(1) <= Duration::MAX);
    }

    #[tokio::test]
    async fn test_publish_recovers_after_outage() {
        let broker = Arc::new(InMemoryBroker::default());
        let mut options = fast_options();
        options.reconnect.max_attempts = 1_000;
        let client = BrokerClient::new(broker.clone(), Arc::new(SystemTimeProvider), options);
        broker.set_available(false);

        let restore = {
            let broker = broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3)).await;
                broker.set_available(true);
            })
        };

        let task = Task::new_test("default", "echo", TaskArgs::new());
        client.publish(&task).await.unwrap();
        restore.await.unwrap();
        assert!(broker.reconnect_attempts() >= 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_with_broker_unavailable() {
        let broker = Arc::new(InMemoryBroker::default());
        let client = client(broker.clone());
        broker.set_available(false);

        let task = Task::new_test("default", "echo", TaskArgs::new());
        let err = client.publish(&task).await.unwrap_err();
        assert!(matches!(err, AppError::BrokerUnavailable(_)));
        assert_eq!(broker.reconnect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_queue_full_is_not_retried() {
        let broker = Arc::new(InMemoryBroker::default());
        let mut options = fast_options();
        options.max_queue_len = Some(1);
        let client = BrokerClient::new(broker.clone(), Arc::new(SystemTimeProvider), options);

        client
            .publish(&Task::new_test("default", "echo", TaskArgs::new()))
            .await
            .unwrap();
        let err = client
            .publish(&Task::new_test("default", "echo", TaskArgs::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QueueFull { .. }));
        assert_eq!(broker.reconnect_attempts(), 0);

        // retries bypass the bound
        client
            .republish(&Task::new_test("default", "echo", TaskArgs::new()))
            .await
            .unwrap();
    }
}
