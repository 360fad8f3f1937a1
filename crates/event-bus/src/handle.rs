use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;

use crate::bus::{EventBus, EventBusExt};
use crate::error::{BusError, Result};

/// Opens new bus connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a fresh connection.
    async fn connect(&self) -> Result<Arc<dyn EventBus>>;

    /// Human-readable target, safe to log.
    fn describe(&self) -> String;
}

struct Installed {
    bus: Arc<dyn EventBus>,
    generation: u64,
}

/// Shared, swappable reference to the current bus connection.
///
/// Readers always see either no connection or a complete one. The bootstrap
/// loop installs each new connection and clears it when it drops; clearing is
/// tied to the generation so a late clear cannot remove a newer connection.
#[derive(Clone)]
pub struct BusHandle {
    current: Arc<ArcSwapOption<Installed>>,
    generations: Arc<AtomicU64>,
}

impl BusHandle {
    /// Creates a handle with no connection.
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwapOption::empty()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a handle that already holds a connection.
    pub fn with_bus(bus: Arc<dyn EventBus>) -> Self {
        let handle = Self::new();
        handle.install(bus);
        handle
    }

    /// Publishes `bus` as the current connection and returns its generation.
    pub fn install(&self, bus: Arc<dyn EventBus>) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.current
            .store(Some(Arc::new(Installed { bus, generation })));
        generation
    }

    /// Clears the current connection if it is still the given generation.
    pub fn clear(&self, generation: u64) {
        self.current.rcu(|current| match current {
            Some(installed) if installed.generation == generation => None,
            other => other.clone(),
        });
    }

    /// Returns the current connection if it is usable.
    pub fn current(&self) -> Option<Arc<dyn EventBus>> {
        self.current
            .load_full()
            .filter(|installed| installed.bus.is_connected())
            .map(|installed| installed.bus.clone())
    }

    /// Returns true if a usable connection is installed.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Publishes a JSON message on the current connection.
    pub async fn publish_json<T>(&self, exchange: &str, routing_key: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bus = self.current().ok_or(BusError::NotConnected)?;
        bus.publish_json(exchange, routing_key, message).await
    }
}

impl Default for BusHandle {
    fn default() -> Self {
        Self::new()
    }
}
