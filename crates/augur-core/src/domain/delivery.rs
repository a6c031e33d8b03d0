//! Delivery model: the broker-side handle for one in-flight message.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Broker-assigned delivery tag, monotonically increasing per channel.
///
/// Valid only within the channel (and connection epoch) that issued it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message identity assigned at publish time.
///
/// Unlike the delivery tag, this survives redelivery across channels, which
/// makes it the stable key for log correlation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// One message handed to a consumer, not yet acknowledged.
///
/// The broker owns message storage for the whole delivery lifecycle; this is
/// the consumer's transient processing view of it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message_id: MessageId,

    /// True when this message was delivered before and returned to the queue.
    pub redelivered: bool,

    /// How many times this message has been returned to the queue.
    pub redeliveries: u32,

    /// Raw message body, expected to decode via [`crate::decode`].
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_display_with_prefix() {
        let id = MessageId::generate();
        assert!(id.to_string().starts_with("msg-"));
    }

    #[test]
    fn message_id_roundtrips_through_ulid() {
        let id = MessageId::generate();
        assert_eq!(MessageId::from_ulid(id.as_ulid()), id);
    }

    #[test]
    fn delivery_tags_order_by_value() {
        assert!(DeliveryTag::new(1) < DeliveryTag::new(2));
        assert_eq!(DeliveryTag::new(7).to_string(), "7");
    }
}
