//! Bus connection lifecycle.

use std::sync::Arc;
use std::time::Duration;

use event_bus::{BusHandle, Connector, EventBus, MessageHandler, Subscription};
use tokio::sync::watch;

use crate::error::Result;
use crate::events::{INVENTORY_EVENTS, ORDER_EVENTS, PRODUCT_EVENTS, USER_EVENTS, queues};
use crate::reconciler::DeletionReconciler;

/// Delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shared queue the stock ledger consumes inventory events from.
pub const INVENTORY_LEDGER_QUEUE: &str = "products-inventory-events";

/// Connects to the bus, wires the subscriptions, and keeps reconnecting.
///
/// Each successful connection declares the exchanges this service owns,
/// binds the reconciler to user and product events, and is then installed in
/// the [`BusHandle`]. When the connection drops the handle is cleared and the
/// whole sequence runs again after a fixed delay, with no attempt limit.
pub struct SagaBootstrap {
    connector: Arc<dyn Connector>,
    handle: BusHandle,
    reconciler: Arc<DeletionReconciler>,
    inventory_ledger: Option<Arc<dyn MessageHandler>>,
    retry_delay: Duration,
}

impl SagaBootstrap {
    pub fn new(
        connector: Arc<dyn Connector>,
        handle: BusHandle,
        reconciler: Arc<DeletionReconciler>,
    ) -> Self {
        Self {
            connector,
            handle,
            reconciler,
            inventory_ledger: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Also feeds inventory events to an in-process stock ledger.
    pub fn with_inventory_ledger(mut self, ledger: Arc<dyn MessageHandler>) -> Self {
        self.inventory_ledger = Some(ledger);
        self
    }

    /// Runs until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let target = self.connector.describe();
        let mut attempt: u64 = 0;

        while !*shutdown.borrow() {
            attempt += 1;
            match self.connect().await {
                Ok(bus) => {
                    let generation = self.handle.install(bus.clone());
                    tracing::info!(%target, attempt, "event bus connected");
                    attempt = 0;

                    tokio::select! {
                        _ = bus.closed() => {
                            self.handle.clear(generation);
                            tracing::warn!(%target, "event bus connection lost");
                        }
                        _ = shutdown.changed() => {
                            self.handle.clear(generation);
                            if let Err(e) = bus.close().await {
                                tracing::debug!(error = %e, "error closing event bus");
                            }
                            break;
                        }
                    }
                }
                Err(e) => {
                    metrics::counter!("bus_reconnect_attempts_total").increment(1);
                    tracing::warn!(
                        %target,
                        attempt,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "event bus connection failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("event bus bootstrap stopped");
    }

    async fn connect(&self) -> Result<Arc<dyn EventBus>> {
        let bus = self.connector.connect().await?;

        bus.declare_exchange(ORDER_EVENTS).await?;
        bus.declare_exchange(INVENTORY_EVENTS).await?;

        let reconciler: Arc<dyn MessageHandler> = self.reconciler.clone();
        bus.subscribe(
            Subscription::shared(USER_EVENTS, "user.#", queues::USER_EVENTS)?,
            reconciler.clone(),
        )
        .await?;
        bus.subscribe(
            Subscription::shared(PRODUCT_EVENTS, "product.#", queues::PRODUCT_EVENTS)?,
            reconciler,
        )
        .await?;

        if let Some(ledger) = &self.inventory_ledger {
            bus.subscribe(
                Subscription::shared(INVENTORY_EVENTS, "inventory.*", INVENTORY_LEDGER_QUEUE)?,
                ledger.clone(),
            )
            .await?;
        }

        Ok(bus)
    }
}
