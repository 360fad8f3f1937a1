use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{HandlerError, Result};
use crate::message::{Delivery, Subscription};

/// Consumer callback for subscribed messages.
///
/// Delivery is at-least-once: a message whose handler failed, or whose
/// connection died before the acknowledgement, is handed out again.
/// Implementations must tolerate seeing the same message twice.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message. Returning `Ok` acknowledges it.
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError>;
}

/// A connection to a topic-routed publish/subscribe broker.
///
/// All exchanges are durable topic exchanges and every published message is
/// marked persistent.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Declares a durable topic exchange. Idempotent.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    /// Publishes an encoded payload. Fire-and-forget once the broker accepted it.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Binds a queue per the subscription and starts delivering to `handler`,
    /// one message in flight at a time.
    async fn subscribe(
        &self,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()>;

    /// Returns true while the connection is usable.
    fn is_connected(&self) -> bool;

    /// Resolves once the connection has been lost or closed.
    async fn closed(&self);

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for event buses.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes `message` as JSON and publishes it.
    async fn publish_json<T>(&self, exchange: &str, routing_key: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(message)?;
        self.publish(exchange, routing_key, payload).await
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}

/// Handler attempts a message gets before it is dead-lettered.
pub const MAX_HANDLER_ATTEMPTS: u32 = 2;

/// What to do with a message after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    /// Hand the message out again with one more recorded failure.
    Retry,
    DeadLetter,
}

/// Runs a handler and decides how to settle the message.
///
/// A failed message is retried until its handler failed
/// [`MAX_HANDLER_ATTEMPTS`] times, then dead-lettered so one poison message
/// cannot stall the queue. Only handler failures count: a message that was
/// in flight when a connection dropped comes back with its count unchanged.
pub(crate) async fn dispatch(handler: &dyn MessageHandler, delivery: &Delivery) -> Settlement {
    metrics::counter!("bus_messages_delivered_total").increment(1);

    let Err(e) = handler.handle(delivery).await else {
        return Settlement::Ack;
    };

    metrics::counter!("bus_handler_failures_total").increment(1);
    let attempts = delivery.handler_failures.saturating_add(1);
    if attempts < MAX_HANDLER_ATTEMPTS {
        tracing::error!(
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            attempts,
            error = %e,
            "message handler failed, retrying"
        );
        Settlement::Retry
    } else {
        metrics::counter!("bus_messages_dead_lettered_total").increment(1);
        tracing::error!(
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            attempts,
            error = %e,
            "message handler failed too often, dead-lettering"
        );
        Settlement::DeadLetter
    }
}
