//! In-memory broker with work-queue semantics.
//!
//! Models the slice of the broker protocol this worker relies on: durable
//! named queues, per-channel monotonic delivery tags, prefetch-bounded
//! delivery, explicit ack/reject with a requeue flag, and redelivery of
//! unacked messages when the connection drops.
//!
//! Restart semantics are modeled too so durability is testable: durable
//! queues and persistent messages survive [`InMemoryBroker::restart`],
//! everything else is lost, and handles from before the restart observe a
//! closed connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{BrokerCounts, DeliveryLease, Subscription};
use crate::domain::{BrokerError, Delivery, DeliveryTag, MessageId};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Vec<u8>,
    persistent: bool,
    redeliveries: u32,
}

#[derive(Debug)]
struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
}

/// A delivered-but-unsettled message, keyed by (channel id, delivery tag).
#[derive(Debug)]
struct UnackedMessage {
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<(u64, DeliveryTag), UnackedMessage>,
    acked_log: Vec<DeliveryTag>,
    acked: u64,
    rejected: u64,
    requeued: u64,
    closed: bool,

    /// Bumped on restart; handles carry the epoch they were issued under and
    /// become unusable once it changes.
    epoch: u64,
    next_channel_id: u64,
}

impl BrokerState {
    fn counts(&self) -> BrokerCounts {
        BrokerCounts {
            ready: self.queues.values().map(|q| q.ready.len()).sum(),
            unacked: self.unacked.len(),
            acked: self.acked,
            rejected: self.rejected,
            requeued: self.requeued,
        }
    }
}

/// In-memory broker shared between producers and consumers in one process.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Open a channel. Fails once the broker has been shut down.
    pub async fn connect(&self) -> Result<Channel, BrokerError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::ConnectionRefused);
        }
        let channel_id = state.next_channel_id;
        state.next_channel_id += 1;
        Ok(Channel {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
            channel_id,
            epoch: state.epoch,
            prefetch: 1,
            next_tag: AtomicU64::new(1),
        })
    }

    /// Stop serving. Waiting subscriptions observe end-of-stream.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Simulate a broker restart.
    ///
    /// Unacked persistent messages return to their durable queues as
    /// redelivered; non-durable queues and transient messages are lost.
    pub async fn restart(&self) {
        let mut state = self.state.lock().await;
        state.epoch += 1;
        state.queues.retain(|_, queue| queue.durable);
        for queue in state.queues.values_mut() {
            queue.ready.retain(|message| message.persistent);
        }

        let returned: Vec<UnackedMessage> = state
            .unacked
            .drain()
            .map(|(_, unacked)| unacked)
            .filter(|unacked| unacked.message.persistent)
            .collect();
        for mut unacked in returned {
            if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                unacked.message.redeliveries += 1;
                queue.ready.push_front(unacked.message);
            }
        }

        state.closed = false;
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn counts(&self) -> BrokerCounts {
        self.state.lock().await.counts()
    }

    /// Tags acked so far, in settle order (for tests).
    #[cfg(test)]
    pub(crate) async fn acked_tags(&self) -> Vec<DeliveryTag> {
        self.state.lock().await.acked_log.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One channel on the broker: single-owner, not shared across sessions.
#[derive(Debug)]
pub struct Channel {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    channel_id: u64,
    epoch: u64,
    prefetch: usize,
    next_tag: AtomicU64,
}

impl Channel {
    async fn guard(&self) -> Result<tokio::sync::MutexGuard<'_, BrokerState>, BrokerError> {
        let state = self.state.lock().await;
        if state.closed || state.epoch != self.epoch {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(state)
    }

    /// Declare a queue, creating it if absent. Durable queues survive a
    /// broker restart. Redeclaration keeps the original durability.
    pub async fn queue_declare(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        let mut state = self.guard().await?;
        state.queues.entry(name.to_string()).or_insert(QueueState {
            durable,
            ready: VecDeque::new(),
        });
        Ok(())
    }

    /// Publish one message. Persistent messages in durable queues survive a
    /// broker restart while unacknowledged.
    pub async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<MessageId, BrokerError> {
        let mut state = self.guard().await?;
        let queue = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        let message_id = MessageId::generate();
        queue.ready.push_back(StoredMessage {
            message_id,
            body,
            persistent,
            redeliveries: 0,
        });
        drop(state);
        self.notify.notify_waiters();
        Ok(message_id)
    }

    /// Set the prefetch budget: the maximum number of unacknowledged
    /// deliveries this channel may hold at once. Zero is treated as one.
    pub fn qos(&mut self, prefetch: usize) {
        self.prefetch = prefetch.max(1);
    }

    /// Start consuming from `queue`. The channel moves into the subscription,
    /// which keeps each channel single-owner; publishing happens on a
    /// separate channel.
    pub async fn consume(self, queue: &str) -> Result<MemorySubscription, BrokerError> {
        {
            let state = self.guard().await?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::UnknownQueue(queue.to_string()));
            }
        }
        Ok(MemorySubscription {
            channel: self,
            queue: queue.to_string(),
        })
    }
}

/// Consumer session: an open channel paired with an active subscription.
pub struct MemorySubscription {
    channel: Channel,
    queue: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&self) -> Option<Box<dyn DeliveryLease>> {
        loop {
            // Register for wakeups before checking state, so a publish or a
            // freed prefetch slot between the check and the await is not lost.
            let notified = self.channel.notify.notified();

            {
                let mut state = self.channel.state.lock().await;
                if state.closed || state.epoch != self.channel.epoch {
                    return None;
                }

                let outstanding = state
                    .unacked
                    .keys()
                    .filter(|(channel_id, _)| *channel_id == self.channel.channel_id)
                    .count();
                if outstanding < self.channel.prefetch {
                    let next = state
                        .queues
                        .get_mut(&self.queue)
                        .and_then(|queue| queue.ready.pop_front());
                    if let Some(message) = next {
                        let tag =
                            DeliveryTag::new(self.channel.next_tag.fetch_add(1, Ordering::Relaxed));
                        let delivery = Delivery {
                            tag,
                            message_id: message.message_id,
                            redelivered: message.redeliveries > 0,
                            redeliveries: message.redeliveries,
                            body: message.body.clone(),
                        };
                        state.unacked.insert(
                            (self.channel.channel_id, tag),
                            UnackedMessage {
                                queue: self.queue.clone(),
                                message,
                            },
                        );
                        return Some(Box::new(MemoryLease {
                            delivery,
                            key: (self.channel.channel_id, tag),
                            epoch: self.channel.epoch,
                            state: Arc::clone(&self.channel.state),
                            notify: Arc::clone(&self.channel.notify),
                        }));
                    }
                }
            }

            notified.await;
        }
    }
}

struct MemoryLease {
    delivery: Delivery,
    key: (u64, DeliveryTag),
    epoch: u64,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryLease {
    async fn settle(
        &self,
    ) -> Result<(tokio::sync::MutexGuard<'_, BrokerState>, UnackedMessage), BrokerError> {
        let mut state = self.state.lock().await;
        if state.closed || state.epoch != self.epoch {
            return Err(BrokerError::ConnectionClosed);
        }
        let unacked = state
            .unacked
            .remove(&self.key)
            .ok_or(BrokerError::UnknownDeliveryTag(self.delivery.tag))?;
        Ok((state, unacked))
    }
}

#[async_trait]
impl DeliveryLease for MemoryLease {
    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        {
            let (mut state, _discarded) = self.settle().await?;
            state.acked += 1;
            state.acked_log.push(self.delivery.tag);
        }
        // A prefetch slot freed up; wake waiting subscriptions.
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        {
            let (mut state, mut unacked) = self.settle().await?;
            if requeue {
                unacked.message.redeliveries += 1;
                state.requeued += 1;
                if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                    // Requeued messages go back near the head, ahead of
                    // not-yet-delivered ones.
                    queue.ready.push_front(unacked.message);
                }
            } else {
                state.rejected += 1;
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const QUEUE: &str = "task_queue";

    async fn broker_with_queue() -> (InMemoryBroker, Channel) {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.queue_declare(QUEUE, true).await.unwrap();
        (broker, channel)
    }

    async fn consumer(broker: &InMemoryBroker, prefetch: usize) -> MemorySubscription {
        let mut channel = broker.connect().await.unwrap();
        channel.qos(prefetch);
        channel.consume(QUEUE).await.unwrap()
    }

    #[tokio::test]
    async fn publish_consume_ack_roundtrip() {
        let (broker, channel) = broker_with_queue().await;
        let message_id = channel.publish(QUEUE, b"body".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();
        assert_eq!(lease.delivery().message_id, message_id);
        assert_eq!(lease.delivery().body, b"body");
        assert!(!lease.delivery().redelivered);
        lease.ack().await.unwrap();

        let counts = broker.counts().await;
        assert_eq!(counts.acked, 1);
        assert!(counts.is_drained());
    }

    #[tokio::test]
    async fn publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        let err = channel.publish("nowhere", vec![], true).await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn prefetch_one_holds_back_second_message() {
        let (broker, channel) = broker_with_queue().await;
        channel.publish(QUEUE, b"first".to_vec(), true).await.unwrap();
        channel.publish(QUEUE, b"second".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let first = subscription.next_delivery().await.unwrap();

        // The second message must not be delivered while the first is
        // outstanding.
        let held_back =
            tokio::time::timeout(Duration::from_millis(50), subscription.next_delivery()).await;
        assert!(held_back.is_err());
        assert_eq!(broker.counts().await.unacked, 1);

        first.ack().await.unwrap();
        let second = subscription.next_delivery().await.unwrap();
        assert_eq!(second.delivery().body, b"second");
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn delivery_tags_are_monotonic_per_channel() {
        let (broker, channel) = broker_with_queue().await;
        for _ in 0..3 {
            channel.publish(QUEUE, vec![], true).await.unwrap();
        }

        let subscription = consumer(&broker, 3).await;
        let mut tags = Vec::new();
        for _ in 0..3 {
            let lease = subscription.next_delivery().await.unwrap();
            tags.push(lease.delivery().tag);
            lease.ack().await.unwrap();
        }
        assert!(tags.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(broker.acked_tags().await, tags);
    }

    #[tokio::test]
    async fn reject_with_requeue_marks_redelivery() {
        let (broker, channel) = broker_with_queue().await;
        channel.publish(QUEUE, b"body".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();
        lease.reject(true).await.unwrap();

        let lease = subscription.next_delivery().await.unwrap();
        assert!(lease.delivery().redelivered);
        assert_eq!(lease.delivery().redeliveries, 1);
        lease.ack().await.unwrap();
        assert_eq!(broker.counts().await.requeued, 1);
    }

    #[tokio::test]
    async fn reject_without_requeue_drops_message() {
        let (broker, channel) = broker_with_queue().await;
        channel.publish(QUEUE, b"poison".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();
        lease.reject(false).await.unwrap();

        let counts = broker.counts().await;
        assert_eq!(counts.rejected, 1);
        assert!(counts.is_drained());
    }

    #[tokio::test]
    async fn requeued_message_is_redelivered_before_later_ones() {
        let (broker, channel) = broker_with_queue().await;
        channel.publish(QUEUE, b"first".to_vec(), true).await.unwrap();
        channel.publish(QUEUE, b"second".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();
        assert_eq!(lease.delivery().body, b"first");
        lease.reject(true).await.unwrap();

        let lease = subscription.next_delivery().await.unwrap();
        assert_eq!(lease.delivery().body, b"first");
        lease.ack().await.unwrap();
    }

    #[tokio::test]
    async fn restart_keeps_only_persistent_messages_in_durable_queues() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.queue_declare("durable", true).await.unwrap();
        channel.queue_declare("transient", false).await.unwrap();
        channel.publish("durable", b"keep".to_vec(), true).await.unwrap();
        channel.publish("durable", b"lose".to_vec(), false).await.unwrap();
        channel.publish("transient", b"gone".to_vec(), true).await.unwrap();

        broker.restart().await;

        let mut channel = broker.connect().await.unwrap();
        channel.qos(1);
        channel.queue_declare("durable", true).await.unwrap();
        assert_eq!(broker.counts().await.ready, 1);

        let subscription = channel.consume("durable").await.unwrap();
        let lease = subscription.next_delivery().await.unwrap();
        assert_eq!(lease.delivery().body, b"keep");
        lease.ack().await.unwrap();
    }

    #[tokio::test]
    async fn restart_returns_unacked_message_as_redelivered() {
        let (broker, channel) = broker_with_queue().await;
        channel.publish(QUEUE, b"body".to_vec(), true).await.unwrap();

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();

        // Crash before ack: the broker retains the message.
        broker.restart().await;

        // The old lease belongs to a dead connection.
        let err = lease.ack().await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionClosed));

        let subscription = consumer(&broker, 1).await;
        let lease = subscription.next_delivery().await.unwrap();
        assert!(lease.delivery().redelivered);
        assert_eq!(lease.delivery().body, b"body");
        lease.ack().await.unwrap();
    }

    #[tokio::test]
    async fn connect_after_close_is_refused() {
        let broker = InMemoryBroker::new();
        broker.close().await;
        let err = broker.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionRefused));
    }

    #[tokio::test]
    async fn close_ends_waiting_subscriptions() {
        let (broker, _channel) = broker_with_queue().await;
        let subscription = Arc::new(consumer(&broker, 1).await);

        let waiter = tokio::spawn({
            let subscription = Arc::clone(&subscription);
            async move { subscription.next_delivery().await.is_none() }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await;
        assert!(waiter.await.unwrap());
    }
}
