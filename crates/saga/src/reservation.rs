//! Stock claims for orders.
//!
//! Reservations travel as `inventory.reserved` events while the bus is up.
//! When it is not, each item falls back to a direct stock decrement against
//! the products service. Confirmations and restorations have no direct path.

use std::sync::Arc;

use common::OrderId;
use domain::{Compensation, Order, OrderItem};
use event_bus::BusHandle;

use crate::error::Result;
use crate::events::{INVENTORY_EVENTS, InventoryEvent, InventoryEventKind};
use crate::services::ProductCatalog;

/// How a reservation reached the inventory owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPath {
    /// Every item went out as an `inventory.reserved` event.
    EventBus,
    /// At least one item was decremented directly.
    DirectCall,
}

impl ReservationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationPath::EventBus => "event_bus",
            ReservationPath::DirectCall => "direct_call",
        }
    }
}

impl std::fmt::Display for ReservationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emits the inventory side of the order lifecycle.
#[derive(Clone)]
pub struct InventoryReservations {
    bus: BusHandle,
    catalog: Arc<dyn ProductCatalog>,
}

impl InventoryReservations {
    pub fn new(bus: BusHandle, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { bus, catalog }
    }

    /// Claims stock for every item of a stored order.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve(&self, order_id: OrderId, items: &[OrderItem]) -> Result<ReservationPath> {
        let mut path = ReservationPath::EventBus;

        for item in items {
            let event = InventoryEvent {
                product_id: item.product_id,
                quantity: item.quantity,
                order_id,
            };

            if self.publish(InventoryEventKind::Reserved, &event).await {
                continue;
            }

            path = ReservationPath::DirectCall;
            metrics::counter!("inventory_reservation_fallback_total").increment(1);
            self.catalog
                .decrement_stock(item.product_id, item.quantity)
                .await?;
        }

        tracing::info!(%order_id, path = path.as_str(), "inventory reserved");
        Ok(path)
    }

    /// Emits the confirmation or restoration an order owes. Returns how many
    /// events were published.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn settle(&self, order: &Order, compensation: Compensation) -> usize {
        let kind = InventoryEventKind::from(compensation);
        let mut published = 0;

        for item in &order.items {
            let event = InventoryEvent {
                product_id: item.product_id,
                quantity: item.quantity,
                order_id: order.id,
            };
            if self.publish(kind, &event).await {
                published += 1;
            }
        }

        if published < order.items.len() {
            tracing::warn!(
                order_id = %order.id,
                kind = kind.as_str(),
                dropped = order.items.len() - published,
                "inventory events dropped, stock must be reconciled by hand"
            );
        }
        published
    }

    /// Publishes one inventory event. Returns false if it did not go out.
    async fn publish(&self, kind: InventoryEventKind, event: &InventoryEvent) -> bool {
        match self
            .bus
            .publish_json(INVENTORY_EVENTS, kind.routing_key(), event)
            .await
        {
            Ok(()) => {
                metrics::counter!("inventory_events_published_total", "kind" => kind.as_str())
                    .increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("event_publish_failures_total").increment(1);
                tracing::warn!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    routing_key = kind.routing_key(),
                    error = %e,
                    "inventory event not published"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryProductCatalog;
    use common::{ProductId, UserId};
    use domain::{Money, NewOrder};
    use event_bus::{EventBus, InMemoryBroker};

    fn items() -> Vec<OrderItem> {
        vec![
            OrderItem::new(ProductId::new(1), 2, "Laptop", Money::from_cents(99999)),
            OrderItem::new(ProductId::new(3), 1, "Headphones", Money::from_cents(19999)),
        ]
    }

    async fn connected() -> (InMemoryBroker, BusHandle) {
        let broker = InMemoryBroker::new();
        let bus = broker.open().unwrap();
        bus.declare_exchange(INVENTORY_EVENTS).await.unwrap();
        (broker, BusHandle::with_bus(Arc::new(bus)))
    }

    #[tokio::test]
    async fn test_reserve_over_bus() {
        let (broker, handle) = connected().await;
        let catalog = InMemoryProductCatalog::with_sample_products();
        let reservations = InventoryReservations::new(handle, Arc::new(catalog.clone()));

        let path = reservations.reserve(OrderId::new(7), &items()).await.unwrap();

        assert_eq!(path, ReservationPath::EventBus);
        let reserved = broker.published_with_key("inventory.reserved");
        assert_eq!(reserved.len(), 2);
        let first: InventoryEvent = reserved[0].json().unwrap();
        assert_eq!(first.order_id, OrderId::new(7));
        assert_eq!(first.quantity, 2);
        // Stock only moves once the owner consumes the events.
        assert_eq!(catalog.stock(ProductId::new(1)), Some(10));
    }

    #[tokio::test]
    async fn test_reserve_falls_back_to_direct_call() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        let reservations = InventoryReservations::new(BusHandle::new(), Arc::new(catalog.clone()));

        let path = reservations.reserve(OrderId::new(7), &items()).await.unwrap();

        assert_eq!(path, ReservationPath::DirectCall);
        assert_eq!(catalog.stock(ProductId::new(1)), Some(8));
        assert_eq!(catalog.stock(ProductId::new(3)), Some(49));
    }

    #[tokio::test]
    async fn test_settle_publishes_per_item() {
        let (broker, handle) = connected().await;
        let reservations = InventoryReservations::new(
            handle,
            Arc::new(InMemoryProductCatalog::with_sample_products()),
        );
        let new = NewOrder::new(UserId::new(1), items()).unwrap();
        let order = Order::from_new(OrderId::new(3), new, chrono::Utc::now());

        let published = reservations.settle(&order, Compensation::Confirm).await;

        assert_eq!(published, 2);
        assert_eq!(broker.published_with_key("inventory.confirmed").len(), 2);
    }

    #[tokio::test]
    async fn test_settle_while_disconnected_drops_events() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        let reservations = InventoryReservations::new(BusHandle::new(), Arc::new(catalog.clone()));
        let new = NewOrder::new(UserId::new(1), items()).unwrap();
        let order = Order::from_new(OrderId::new(3), new, chrono::Utc::now());

        assert_eq!(reservations.settle(&order, Compensation::Restore).await, 0);
        assert_eq!(catalog.stock(ProductId::new(1)), Some(10));
    }
}
