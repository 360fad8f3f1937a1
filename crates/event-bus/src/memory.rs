use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::{EventBus, MessageHandler, Settlement, dispatch};
use crate::error::{BusError, Result};
use crate::handle::Connector;
use crate::message::{Delivery, Subscription};
use crate::topic::RoutingPattern;

/// A message as it was accepted by the broker, kept for inspection.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decodes the JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

struct Consumer {
    handler: Arc<dyn MessageHandler>,
    connection: u64,
}

struct Queue {
    /// Connection that owns a private queue.
    owner: Option<u64>,
    messages: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    pumping: bool,
}

struct Binding {
    exchange: String,
    pattern: RoutingPattern,
    queue: String,
}

#[derive(Default)]
struct BrokerState {
    unavailable: bool,
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    connections: HashMap<u64, watch::Sender<bool>>,
    next_connection: u64,
    next_tag: u64,
    published: Vec<PublishedMessage>,
    dead_letters: Vec<Delivery>,
}

/// In-memory topic broker for testing and single-process runs.
///
/// Mirrors the broker semantics the saga relies on: durable exchanges and
/// shared queues outlive connections, private queues die with their
/// connection, a message is only removed once its handler succeeded, and
/// messages in flight on a dropped connection are redelivered.
///
/// Delivery is driven by the publisher: `publish` routes the message and
/// runs the bound handlers before returning, which keeps tests deterministic.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection.
    pub fn open(&self) -> Result<InMemoryEventBus> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(BusError::Connection("broker unavailable".to_string()));
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let (tx, rx) = watch::channel(false);
        state.connections.insert(id, tx);

        Ok(InMemoryEventBus {
            broker: self.clone(),
            id,
            closed: rx,
        })
    }

    /// Makes the broker refuse (or accept again) new connections.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Drops every open connection, as a broker restart would.
    pub fn sever_connections(&self) {
        let ids: Vec<u64> = self.lock().connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id);
        }
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Returns every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Returns the accepted messages with the given routing key.
    pub fn published_with_key(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Forgets the publish log.
    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    /// Returns true if the exchange has been declared.
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains(exchange)
    }

    /// Returns true if the named queue exists.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Returns the number of messages waiting in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Returns the number of messages whose handler failed too often.
    pub fn dead_letter_count(&self) -> usize {
        self.lock().dead_letters.len()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_open(&self, connection: u64) -> bool {
        self.lock().connections.contains_key(&connection)
    }

    fn close_connection(&self, connection: u64) {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(tx) = state.connections.remove(&connection) {
            tx.send_replace(true);
        }

        for queue in state.queues.values_mut() {
            queue.consumers.retain(|c| c.connection != connection);
        }

        let private: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &private {
            state.queues.remove(name);
        }
        state.bindings.retain(|b| !private.contains(&b.queue));
    }

    fn declare(&self, exchange: &str) {
        self.lock().exchanges.insert(exchange.to_string());
    }

    /// Stores the message in every bound queue and returns their names.
    fn route(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<Vec<String>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.exchanges.contains(exchange) {
            return Err(BusError::ExchangeNotFound(exchange.to_string()));
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.clone(),
        });

        // A queue bound by several matching patterns still gets one copy.
        let mut targets: Vec<String> = Vec::new();
        for binding in &state.bindings {
            if binding.exchange == exchange
                && binding.pattern.matches(routing_key)
                && !targets.contains(&binding.queue)
            {
                targets.push(binding.queue.clone());
            }
        }

        for name in &targets {
            state.next_tag += 1;
            if let Some(queue) = state.queues.get_mut(name) {
                queue.messages.push_back(Delivery {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                    handler_failures: 0,
                    delivery_tag: state.next_tag,
                });
            }
        }

        Ok(targets)
    }

    fn bind(
        &self,
        connection: u64,
        subscription: &Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<String> {
        let mut guard = self.lock();
        let state = &mut *guard;

        state.exchanges.insert(subscription.exchange.clone());

        let name = subscription
            .consumer_group
            .clone()
            .unwrap_or_else(|| format!("amq.gen-{}", Uuid::new_v4()));

        let queue = state.queues.entry(name.clone()).or_insert_with(|| Queue {
            owner: (!subscription.is_durable()).then_some(connection),
            messages: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            pumping: false,
        });

        if let Some(owner) = queue.owner.filter(|owner| *owner != connection) {
            return Err(BusError::Subscribe {
                exchange: subscription.exchange.clone(),
                pattern: subscription.pattern.to_string(),
                reason: format!("queue '{name}' is exclusive to connection {owner}"),
            });
        }

        queue.consumers.push(Consumer {
            handler,
            connection,
        });

        let already_bound = state.bindings.iter().any(|b| {
            b.queue == name
                && b.exchange == subscription.exchange
                && b.pattern == subscription.pattern
        });
        if !already_bound {
            state.bindings.push(Binding {
                exchange: subscription.exchange.clone(),
                pattern: subscription.pattern.clone(),
                queue: name.clone(),
            });
        }

        Ok(name)
    }

    /// Delivers waiting messages of a queue, one at a time.
    ///
    /// Only one pump runs per queue; a publish from inside a handler just
    /// enqueues and lets the running pump pick the message up.
    async fn pump(&self, queue: &str) {
        if !self.claim_pump(queue) {
            return;
        }

        while let Some((handler, connection, delivery)) = self.next_delivery(queue) {
            let settlement = dispatch(handler.as_ref(), &delivery).await;
            self.settle(queue, connection, delivery, settlement);
        }
    }

    fn claim_pump(&self, queue: &str) -> bool {
        let mut state = self.lock();
        match state.queues.get_mut(queue) {
            Some(q) if !q.pumping && !q.consumers.is_empty() => {
                q.pumping = true;
                true
            }
            _ => false,
        }
    }

    fn next_delivery(&self, queue: &str) -> Option<(Arc<dyn MessageHandler>, u64, Delivery)> {
        let mut state = self.lock();
        let q = state.queues.get_mut(queue)?;

        let next = if q.consumers.is_empty() {
            None
        } else {
            q.messages.pop_front().map(|delivery| {
                let index = q.next_consumer % q.consumers.len();
                q.next_consumer = q.next_consumer.wrapping_add(1);
                let consumer = &q.consumers[index];
                (consumer.handler.clone(), consumer.connection, delivery)
            })
        };

        if next.is_none() {
            q.pumping = false;
        }
        next
    }

    fn settle(&self, queue: &str, connection: u64, mut delivery: Delivery, settlement: Settlement) {
        let open = self.is_open(connection);
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };

        // The acknowledgement never reached the broker.
        if !open {
            delivery.redelivered = true;
            q.messages.push_front(delivery);
            return;
        }

        match settlement {
            Settlement::Ack => {}
            Settlement::Retry => {
                delivery.redelivered = true;
                delivery.handler_failures += 1;
                q.messages.push_front(delivery);
            }
            Settlement::DeadLetter => state.dead_letters.push(delivery),
        }
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn EventBus>> {
        Ok(Arc::new(self.open()?))
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// A connection to an [`InMemoryBroker`].
pub struct InMemoryEventBus {
    broker: InMemoryBroker,
    id: u64,
    closed: watch::Receiver<bool>,
}

impl InMemoryEventBus {
    /// Returns the broker this connection belongs to.
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        self.broker.declare(exchange);
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let queues = self.broker.route(exchange, routing_key, payload)?;
        tracing::debug!(exchange, routing_key, queues = queues.len(), "message published");

        for queue in queues {
            self.broker.pump(&queue).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.ensure_open()?;
        let queue = self.broker.bind(self.id, &subscription, handler)?;
        tracing::info!(
            exchange = %subscription.exchange,
            pattern = %subscription.pattern,
            queue = %queue,
            "subscribed"
        );

        // Anything that waited while nobody consumed goes out now.
        self.broker.pump(&queue).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.closed.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> Result<()> {
        self.broker.close_connection(self.id);
        Ok(())
    }
}
