//! Topic-routed publish/subscribe over an AMQP-style broker.
//!
//! Services publish JSON events to named topic exchanges and subscribe with
//! routing patterns. The [`InMemoryBroker`] reproduces the broker semantics
//! in process; [`AmqpEventBus`] talks to RabbitMQ.

mod amqp;
mod bus;
mod error;
mod handle;
mod memory;
mod message;
mod topic;

pub use amqp::{AmqpConnector, AmqpEventBus};
pub use bus::{EventBus, EventBusExt, MAX_HANDLER_ATTEMPTS, MessageHandler};
pub use error::{BusError, HandlerError, Result};
pub use handle::{BusHandle, Connector};
pub use memory::{InMemoryBroker, InMemoryEventBus, PublishedMessage};
pub use message::{Delivery, Subscription};
pub use topic::RoutingPattern;
