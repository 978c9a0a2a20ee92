// Message Domain Model

use super::queue::QueueName;
use super::task::Task;
use serde::{Deserialize, Serialize};

/// Opaque handle identifying one delivery of a message
///
/// A redelivered message gets a fresh tag; the previous one can no longer be settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw delivery as handed out by a broker backend (body not yet decoded)
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: QueueName,
    pub body: Vec<u8>,
    /// How many times this message has been handed out, including this one
    pub delivery_count: u32,
}

/// Decoded task plus the delivery it arrived on
#[derive(Debug, Clone)]
pub struct Message {
    pub task: Task,
    pub delivery_tag: DeliveryTag,
    pub delivery_count: u32,
}

impl Message {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Per-queue message counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Deliverable now
    pub ready: u64,
    /// Waiting for their ETA
    pub delayed: u64,
    /// Delivered, not yet settled
    pub in_flight: u64,
    /// Dead-lettered
    pub dead: u64,
}

impl QueueCounts {
    /// Messages that count against a queue bound
    pub fn pending(&self) -> u64 {
        self.ready + self.delayed + self.in_flight
    }
}
