//! Broker layer: the consumer-facing port and an in-memory implementation.

mod memory;

pub use memory::{Channel, InMemoryBroker, MemorySubscription};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{BrokerError, Delivery};

/// One unacknowledged delivery held by a consumer.
///
/// Design intent:
/// - The broker owns message storage and state transitions.
/// - The handler executes and reports the result.
/// - Settling consumes `self: Box<Self>`, so "exactly one terminal
///   disposition per delivery" is a type-level property: a lease cannot be
///   acked twice or acked after a reject.
#[async_trait]
pub trait DeliveryLease: Send {
    fn delivery(&self) -> &Delivery;

    /// Positive acknowledgment: the broker may discard the message for good.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Negative acknowledgment. With `requeue` the message returns to its
    /// queue for redelivery; without it the message is dropped.
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// An active consume on one queue, bounded by the channel's prefetch.
///
/// This is the seam for swapping the in-memory broker for a networked one;
/// the consumer loop only ever sees this trait.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait for the next delivery. Returns `None` once the channel or
    /// connection has closed; deliveries already handed out stay settleable
    /// until the connection itself drops.
    async fn next_delivery(&self) -> Option<Box<dyn DeliveryLease>>;
}

/// Snapshot of broker state for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCounts {
    /// Messages sitting in queues, not yet delivered.
    pub ready: usize,

    /// Deliveries handed out and not yet settled.
    pub unacked: usize,

    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
}

impl BrokerCounts {
    /// True once nothing is queued or in flight.
    pub fn is_drained(&self) -> bool {
        self.ready == 0 && self.unacked == 0
    }
}
