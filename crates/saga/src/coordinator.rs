//! Order lifecycle coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use common::{OrderId, ProductId, UserId};
use domain::{
    Money, NewOrder, Order, OrderItem, OrderRepository, OrderStatus, RepositoryError, StatusChange,
};
use event_bus::BusHandle;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::events::{ORDER_EVENTS, OrderCreated, OrderDeleted, OrderStatusUpdated, routing};
use crate::reservation::InventoryReservations;
use crate::services::{ProductCatalog, UserDirectory};

/// Attempts an order write makes before reporting a conflict.
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Request to create an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub user_id: UserId,
    #[serde(default)]
    pub products: Vec<OrderLine>,
    /// Entry status; `processing` when absent.
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

impl CreateOrder {
    pub fn new(user_id: UserId, products: Vec<OrderLine>) -> Self {
        Self {
            user_id,
            products,
            status: None,
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(SagaError::Validation(
                "User ID and products are required".to_string(),
            ));
        }
        if let Some(line) = self.products.iter().find(|line| line.quantity == 0) {
            return Err(SagaError::Validation(format!(
                "Quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        if let Some(status) = self.status.filter(|status| !status.is_entry()) {
            return Err(SagaError::Validation(format!(
                "Orders cannot be created as {status}"
            )));
        }
        Ok(())
    }

    /// Total requested quantity per product.
    fn quantities(&self) -> BTreeMap<ProductId, u32> {
        let mut totals = BTreeMap::new();
        for line in &self.products {
            *totals.entry(line.product_id).or_insert(0u32) += line.quantity;
        }
        totals
    }
}

/// Drives orders through their lifecycle and emits the events each step owes.
///
/// Every persisted change is followed by its order event. Stock is claimed on
/// creation, confirmed on the first completion and restored on the first
/// cancellation or on deletion of an unsettled order.
pub struct OrderSaga {
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserDirectory>,
    products: Arc<dyn ProductCatalog>,
    bus: BusHandle,
    reservations: InventoryReservations,
}

impl OrderSaga {
    /// Creates a new saga coordinator.
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserDirectory>,
        products: Arc<dyn ProductCatalog>,
        bus: BusHandle,
    ) -> Self {
        let reservations = InventoryReservations::new(bus.clone(), products.clone());
        Self {
            orders,
            users,
            products,
            bus,
            reservations,
        }
    }

    /// Returns the bus handle this saga publishes through.
    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Creates an order and claims its stock.
    ///
    /// All checks run before anything is written, so a rejected request
    /// leaves no order and emits nothing.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        let start = Instant::now();
        request.validate()?;

        if self.users.find_user(request.user_id).await?.is_none() {
            return Err(SagaError::UserNotFound(request.user_id));
        }

        let mut snapshots = BTreeMap::new();
        for (product_id, requested) in request.quantities() {
            let product = self
                .products
                .find_product(product_id)
                .await?
                .ok_or(SagaError::ProductNotFound(product_id))?;

            if i64::from(requested) > product.stock {
                return Err(SagaError::InsufficientStock {
                    product_id,
                    product_name: product.name,
                    requested,
                    available: product.stock,
                });
            }
            snapshots.insert(product_id, (product.name, product.price));
        }

        let items = request
            .products
            .iter()
            .map(|line| {
                let (name, price) = &snapshots[&line.product_id];
                OrderItem::new(line.product_id, line.quantity, name.clone(), *price)
            })
            .collect();

        let mut new = NewOrder::new(request.user_id, items)?;
        if let Some(status) = request.status {
            new = new.with_status(status)?;
        }

        let order = self.orders.insert(new).await?;
        tracing::info!(order_id = %order.id, total = %order.total_amount, "order created");

        if let Err(e) = self.reservations.reserve(order.id, &order.items).await {
            tracing::error!(order_id = %order.id, error = %e, "stock reservation failed");
        }

        self.publish(routing::ORDER_CREATED, &OrderCreated::new(&order))
            .await;

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_creation_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        Ok(order)
    }

    /// Moves an order to `target`.
    ///
    /// Requesting the current status returns the order unchanged and emits
    /// nothing. A lost race against another writer reloads the order and
    /// recomputes the transition, up to [`MAX_UPDATE_ATTEMPTS`] times.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, target: OrderStatus) -> Result<Order> {
        if !target.is_requestable() {
            return Err(SagaError::Validation(format!(
                "Status {target} cannot be requested"
            )));
        }

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let mut order = self.load(order_id).await?;
            let change = order.transition(target);
            if change.is_noop() {
                return Ok(order);
            }

            match self.orders.update(&order).await {
                Ok(stored) => {
                    self.after_transition(&stored, change).await;
                    return Ok(stored);
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    metrics::counter!("order_update_conflicts_total").increment(1);
                    tracing::debug!(%order_id, attempt, "order changed concurrently, retrying");
                }
                Err(RepositoryError::NotFound(id)) => return Err(SagaError::OrderNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(SagaError::Conflict {
            order_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn after_transition(&self, order: &Order, change: StatusChange) {
        tracing::info!(
            order_id = %order.id,
            from = %change.previous,
            to = %change.current,
            "order status updated"
        );
        metrics::counter!(
            "order_status_transitions_total",
            "from" => change.previous.as_str(),
            "to" => change.current.as_str()
        )
        .increment(1);

        self.publish(
            routing::ORDER_STATUS_UPDATED,
            &OrderStatusUpdated {
                order_id: order.id,
                user_id: order.user_id,
                old_status: change.previous,
                new_status: change.current,
            },
        )
        .await;

        if let Some(compensation) = change.compensation {
            self.reservations.settle(order, compensation).await;
        }
    }

    /// Deletes an order, returning stock it still holds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let order = self.load(order_id).await?;

            match self.orders.delete(order_id, order.version).await {
                Ok(()) => {
                    tracing::info!(%order_id, status = %order.status, "order deleted");
                    metrics::counter!("orders_deleted_total").increment(1);

                    self.publish(
                        routing::ORDER_DELETED,
                        &OrderDeleted {
                            order_id,
                            user_id: order.user_id,
                        },
                    )
                    .await;

                    if let Some(compensation) = order.deletion_compensation() {
                        self.reservations.settle(&order, compensation).await;
                    }
                    return Ok(());
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    metrics::counter!("order_update_conflicts_total").increment(1);
                    tracing::debug!(%order_id, attempt, "order changed concurrently, retrying");
                }
                Err(RepositoryError::NotFound(id)) => return Err(SagaError::OrderNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(SagaError::Conflict {
            order_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    /// Gets an order by id.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    /// Lists every order.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.list().await?)
    }

    /// Lists one user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn list_user_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.orders.list_by_user(user_id).await?)
    }

    /// Replaces all orders with the demo data set. Emits no events.
    #[tracing::instrument(skip(self))]
    pub async fn seed_sample_orders(&self) -> Result<Vec<Order>> {
        self.orders.clear().await?;

        let price = Money::from_cents;
        let samples = [
            NewOrder::historical(
                UserId::new(1),
                OrderStatus::Completed,
                vec![
                    OrderItem::new(ProductId::new(1), 2, "Laptop", price(99999)),
                    OrderItem::new(ProductId::new(3), 1, "Headphones", price(19999)),
                ],
            )?,
            NewOrder::historical(
                UserId::new(2),
                OrderStatus::Processing,
                vec![OrderItem::new(ProductId::new(2), 1, "Smartphone", price(69999))],
            )?,
            NewOrder::historical(
                UserId::new(4),
                OrderStatus::Shipped,
                vec![
                    OrderItem::new(ProductId::new(5), 1, "Running Shoes", price(12999)),
                    OrderItem::new(ProductId::new(7), 2, "Yoga Mat", price(2999)),
                ],
            )?,
        ];

        let mut seeded = Vec::with_capacity(samples.len());
        for new in samples {
            seeded.push(self.orders.insert(new).await?);
        }
        tracing::info!(count = seeded.len(), "sample orders seeded");
        Ok(seeded)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Publishes an order event. Failures are logged, never returned.
    async fn publish<T>(&self, routing_key: &str, event: &T)
    where
        T: Serialize + Sync,
    {
        if let Err(e) = self.bus.publish_json(ORDER_EVENTS, routing_key, event).await {
            metrics::counter!("event_publish_failures_total").increment(1);
            tracing::warn!(routing_key, error = %e, "order event not published");
        }
    }
}
