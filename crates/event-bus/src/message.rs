//! Messages and subscriptions.

use serde::de::DeserializeOwned;

use crate::error::{BusError, Result};
use crate::topic::RoutingPattern;

/// A message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the publisher used.
    pub routing_key: String,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
    /// True if this message was handed out before and not acknowledged,
    /// including when a connection dropped while it was in flight.
    pub redelivered: bool,
    /// Number of times a handler already returned an error for this message.
    /// A lost connection does not count.
    pub handler_failures: u32,
    /// Broker-assigned tag, unique per connection.
    pub delivery_tag: u64,
}

impl Delivery {
    /// Decodes the JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Describes which messages a subscriber wants and how its queue behaves.
///
/// With a consumer group the queue is named after the group and durable, so
/// several processes sharing the group load-balance one queue and messages
/// wait across reconnects. Without one the queue is private to this
/// connection and disappears with it.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Exchange to bind to.
    pub exchange: String,
    /// Binding pattern.
    pub pattern: RoutingPattern,
    /// Shared queue name, if any.
    pub consumer_group: Option<String>,
}

impl Subscription {
    /// Creates a private subscription.
    pub fn new(exchange: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            exchange: exchange.into(),
            pattern: RoutingPattern::parse(pattern)?,
            consumer_group: None,
        })
    }

    /// Creates a subscription on a shared durable queue.
    pub fn shared(
        exchange: impl Into<String>,
        pattern: &str,
        consumer_group: impl Into<String>,
    ) -> Result<Self> {
        let consumer_group = consumer_group.into();
        if consumer_group.is_empty() {
            return Err(BusError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "consumer group cannot be empty".to_string(),
            });
        }
        Ok(Self {
            consumer_group: Some(consumer_group),
            ..Self::new(exchange, pattern)?
        })
    }

    /// Returns true if the subscription uses a durable shared queue.
    pub fn is_durable(&self) -> bool {
        self.consumer_group.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_subscription_is_durable() {
        let sub = Subscription::shared("user_events", "user.#", "orders-user-events").unwrap();
        assert!(sub.is_durable());
        assert_eq!(sub.consumer_group.as_deref(), Some("orders-user-events"));
    }

    #[test]
    fn private_subscription_is_not_durable() {
        let sub = Subscription::new("user_events", "user.#").unwrap();
        assert!(!sub.is_durable());
    }

    #[test]
    fn rejects_empty_group() {
        assert!(Subscription::shared("user_events", "user.#", "").is_err());
    }

    #[test]
    fn decodes_json_payload() {
        let delivery = Delivery {
            exchange: "user_events".to_string(),
            routing_key: "user.deleted".to_string(),
            payload: br#"{"userId":7}"#.to_vec(),
            redelivered: false,
            handler_failures: 0,
            delivery_tag: 1,
        };
        let value: serde_json::Value = delivery.json().unwrap();
        assert_eq!(value["userId"], 7);
    }
}
