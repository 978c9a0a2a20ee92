// Broker Backend Port
// Pluggable message transport underneath the broker client

use crate::domain::{Delivery, DeliveryTag, QueueCounts};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Message transport interface
///
/// Implementations:
/// - SqliteBroker (infra-sqlite): durable, shared between processes
/// - InMemoryBroker: single process, tests
///
/// Backends serialize their own I/O; a publish is never observed half-written.
#[async_trait]
pub trait BrokerBackend: Send + Sync {
    /// Create the queue if it does not exist (idempotent)
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Store an encoded message, deliverable from `available_at` (epoch ms)
    ///
    /// Deliverable messages go out by `priority` (highest first), then by
    /// `available_at`, then in publish order.
    ///
    /// # Errors
    /// - AppError::QueueFull if `max_len` is set and the queue already holds that many messages
    /// - AppError::BrokerUnavailable on transport failure
    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        available_at: i64,
        priority: u8,
        max_len: Option<u64>,
    ) -> Result<()>;

    /// Lease the next deliverable message for `visibility_timeout_ms`
    ///
    /// Messages whose lease ran out are deliverable again, under a new tag.
    async fn fetch(&self, queue: &str, visibility_timeout_ms: i64) -> Result<Option<Delivery>>;

    /// Remove a delivered message for good
    ///
    /// # Errors
    /// - AppError::InvalidState if the tag is unknown, already settled or its lease expired
    async fn ack(&self, tag: &DeliveryTag) -> Result<()>;

    /// Return a delivered message to the queue (`requeue`) or dead-letter it
    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()>;

    /// Message counts of a queue
    async fn counts(&self, queue: &str) -> Result<QueueCounts>;

    /// Drop every message of a queue (dead letters included); returns the number removed
    async fn flush(&self, queue: &str) -> Result<u64>;

    /// Re-establish the transport after a BrokerUnavailable error
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Suspend until a message may be available on `queue`, or `timeout` elapses
    ///
    /// Backends without push notification just sleep (polling).
    async fn wait_for_message(&self, _queue: &str, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

pub mod memory {
    use super::*;
    use crate::domain::validate_queue_name;
    use crate::error::AppError;
    use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
    use std::cmp::Reverse;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    #[derive(Debug, Clone)]
    enum Slot {
        Ready,
        InFlight { tag: DeliveryTag, lease_expires_at: i64 },
        Dead { dead_at: i64 },
    }

    #[derive(Debug, Clone)]
    struct Stored {
        seq: u64,
        body: Vec<u8>,
        available_at: i64,
        priority: u8,
        delivery_count: u32,
        slot: Slot,
    }

    #[derive(Default)]
    struct State {
        queues: HashMap<String, Vec<Stored>>,
        // tag -> (queue, seq)
        leases: HashMap<DeliveryTag, (String, u64)>,
        next_seq: u64,
    }

    impl State {
        fn reclaim_expired(&mut self, queue: &str, now: i64) {
            let Some(messages) = self.queues.get_mut(queue) else {
                return;
            };
            for msg in messages.iter_mut() {
                if let Slot::InFlight {
                    tag,
                    lease_expires_at,
                } = &msg.slot
                {
                    if *lease_expires_at <= now {
                        self.leases.remove(tag);
                        msg.slot = Slot::Ready;
                    }
                }
            }
        }

        fn leased_mut(&mut self, tag: &DeliveryTag, now: i64) -> Result<(String, &mut Stored)> {
            let (queue, seq) = self
                .leases
                .get(tag)
                .cloned()
                .ok_or_else(|| AppError::InvalidState(format!("unknown delivery tag {}", tag)))?;
            let msg = self
                .queues
                .get_mut(&queue)
                .and_then(|msgs| msgs.iter_mut().find(|m| m.seq == seq))
                .ok_or_else(|| AppError::InvalidState(format!("unknown delivery tag {}", tag)))?;

            let leased = matches!(
                &msg.slot,
                Slot::InFlight { tag: current, lease_expires_at }
                    if current == tag && *lease_expires_at > now
            );
            if !leased {
                return Err(AppError::InvalidState(format!(
                    "delivery {} is no longer leased",
                    tag
                )));
            }
            Ok((queue, msg))
        }
    }

    /// In-memory broker (single process)
    ///
    /// Supports fault injection through [`InMemoryBroker::set_available`].
    pub struct InMemoryBroker {
        state: Mutex<State>,
        notify: Notify,
        time: Arc<dyn TimeProvider>,
        available: AtomicBool,
        reconnects: AtomicUsize,
        acks: AtomicU64,
        tags: AtomicU64,
    }

    impl Default for InMemoryBroker {
        fn default() -> Self {
            Self::new(Arc::new(SystemTimeProvider))
        }
    }

    impl InMemoryBroker {
        pub fn new(time: Arc<dyn TimeProvider>) -> Self {
            Self {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                time,
                available: AtomicBool::new(true),
                reconnects: AtomicUsize::new(0),
                acks: AtomicU64::new(0),
                tags: AtomicU64::new(1),
            }
        }

        /// Simulate a transport outage (false) or its recovery (true)
        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        /// Number of reconnect attempts seen
        pub fn reconnect_attempts(&self) -> usize {
            self.reconnects.load(Ordering::SeqCst)
        }

        /// Number of successful acks since creation
        pub fn ack_count(&self) -> u64 {
            self.acks.load(Ordering::SeqCst)
        }

        /// Bodies of dead-lettered messages of a queue
        pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
            self.lock()
                .map(|state| {
                    state
                        .queues
                        .get(queue)
                        .map(|msgs| {
                            msgs.iter()
                                .filter(|m| matches!(m.slot, Slot::Dead { .. }))
                                .map(|m| m.body.clone())
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .unwrap_or_default()
        }

        fn check_available(&self) -> Result<()> {
            if self.available.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AppError::BrokerUnavailable(
                    "in-memory broker is offline".to_string(),
                ))
            }
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
            self.state
                .lock()
                .map_err(|_| AppError::Internal("broker state lock poisoned".to_string()))
        }
    }

    #[async_trait]
    impl BrokerBackend for InMemoryBroker {
        async fn declare_queue(&self, queue: &str) -> Result<()> {
            validate_queue_name(queue)?;
            self.check_available()?;
            self.lock()?.queues.entry(queue.to_string()).or_default();
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
            self.check_available()?;
            {
                let mut state = self.lock()?;
                let seq = state.next_seq;
                let messages = state.queues.entry(queue.to_string()).or_default();

                if let Some(limit) = max_len {
                    let pending = messages
                        .iter()
                        .filter(|m| !matches!(m.slot, Slot::Dead { .. }))
                        .count() as u64;
                    if pending >= limit {
                        return Err(AppError::QueueFull {
                            queue: queue.to_string(),
                            limit,
                        });
                    }
                }

                messages.push(Stored {
                    seq,
                    body: body.to_vec(),
                    available_at,
                    priority,
                    delivery_count: 0,
                    slot: Slot::Ready,
                });
                state.next_seq += 1;
            }
            self.notify.notify_waiters();
            Ok(())
        }

        async fn fetch(&self, queue: &str, visibility_timeout_ms: i64) -> Result<Option<Delivery>> {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut state = self.lock()?;
            state.reclaim_expired(queue, now);

            let Some(messages) = state.queues.get_mut(queue) else {
                return Ok(None);
            };
            let next = messages
                .iter_mut()
                .filter(|m| matches!(m.slot, Slot::Ready) && m.available_at <= now)
                .min_by_key(|m| (Reverse(m.priority), m.available_at, m.seq));
            let Some(msg) = next else {
                return Ok(None);
            };

            let tag = DeliveryTag::new(format!(
                "mem-{}",
                self.tags.fetch_add(1, Ordering::SeqCst)
            ));
            msg.delivery_count += 1;
            msg.slot = Slot::InFlight {
                tag: tag.clone(),
                lease_expires_at: now.saturating_add(visibility_timeout_ms),
            };
            let delivery = Delivery {
                tag: tag.clone(),
                queue: queue.to_string(),
                body: msg.body.clone(),
                delivery_count: msg.delivery_count,
            };
            let seq = msg.seq;
            state.leases.insert(tag, (queue.to_string(), seq));
            Ok(Some(delivery))
        }

        async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
            self.check_available()?;
            let now = self.time.now_millis();
            let mut state = self.lock()?;
            let (queue, seq) = {
                let (queue, msg) = state.leased_mut(tag, now)?;
                (queue, msg.seq)
            };
            if let Some(messages) = state.queues.get_mut(&queue) {
                messages.retain(|m| m.seq != seq);
            }
            state.leases.remove(tag);
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()> {
            self.check_available()?;
            let now = self.time.now_millis();
            {
                let mut state = self.lock()?;
                {
                    let (_, msg) = state.leased_mut(tag, now)?;
                    if requeue {
                        msg.slot = Slot::Ready;
                        msg.available_at = now;
                    } else {
                        msg.slot = Slot::Dead { dead_at: now };
                    }
                }
                state.leases.remove(tag);
            }
            if requeue {
                self.notify.notify_waiters();
            }
            Ok(())
        }

        async fn counts(&self, queue: &str) -> Result<QueueCounts> {
            self.check_available()?;
            let now = self.time.now_millis();
            let state = self.lock()?;
            let mut counts = QueueCounts::default();
            for msg in state.queues.get(queue).into_iter().flatten() {
                match &msg.slot {
                    Slot::Ready if msg.available_at > now => counts.delayed += 1,
                    Slot::Ready => counts.ready += 1,
                    Slot::InFlight {
                        lease_expires_at, ..
                    } if *lease_expires_at <= now => counts.ready += 1,
                    Slot::InFlight { .. } => counts.in_flight += 1,
                    Slot::Dead { .. } => counts.dead += 1,
                }
            }
            Ok(counts)
        }

        async fn flush(&self, queue: &str) -> Result<u64> {
            self.check_available()?;
            let mut state = self.lock()?;
            let removed = state
                .queues
                .get_mut(queue)
                .map(std::mem::take)
                .unwrap_or_default();
            state.leases.retain(|_, lease| lease.0 != queue);
            Ok(removed.len() as u64)
        }

        async fn reconnect(&self) -> Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            self.check_available()
        }

        async fn wait_for_message(&self, _queue: &str, timeout: Duration) {
            let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        }
    }

    impl InMemoryBroker {
        /// Drop dead letters older than `before_millis`
        pub fn purge_dead_before(&self, before_millis: i64) -> Result<u64> {
            let mut state = self.lock()?;
            let mut purged = 0;
            for messages in state.queues.values_mut() {
                let before = messages.len();
                messages.retain(|m| !matches!(m.slot, Slot::Dead { dead_at } if dead_at < before_millis));
                purged += (before - messages.len()) as u64;
            }
            Ok(purged)
        }
    }
}
