//! Keeps orders consistent with users and products deleted elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{OrderRepository, RepositoryError};
use event_bus::{Delivery, HandlerError, MessageHandler};

use crate::coordinator::MAX_UPDATE_ATTEMPTS;
use crate::error::{Result, SagaError};
use crate::events::{ProductDeleted, USER_DELETED_NOTE, UserDeleted, routing};

/// Marks open orders `affected` when something they reference is deleted.
///
/// Completed and cancelled orders are history and stay as they are. The
/// reconciler only writes orders; it never publishes.
pub struct DeletionReconciler {
    orders: Arc<dyn OrderRepository>,
}

impl DeletionReconciler {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Handles `user.deleted`. Returns how many orders changed.
    #[tracing::instrument(skip(self))]
    pub async fn on_user_deleted(&self, user_id: UserId) -> Result<usize> {
        let open = self.orders.open_orders_for_user(user_id).await?;

        let mut changed = 0;
        for order in open {
            if self.mark(order.id, USER_DELETED_NOTE, true).await? {
                changed += 1;
            }
        }

        tracing::info!(%user_id, orders = changed, "orders affected by user deletion");
        metrics::counter!("orders_marked_affected_total", "cause" => "user_deleted")
            .increment(changed as u64);
        Ok(changed)
    }

    /// Handles `product.deleted`. Returns how many orders changed.
    #[tracing::instrument(skip(self, event), fields(product_id = %event.product_id))]
    pub async fn on_product_deleted(&self, event: &ProductDeleted) -> Result<usize> {
        let open = self.orders.open_orders_with_product(event.product_id).await?;
        let note = event.status_note();

        let mut changed = 0;
        for order in open {
            if self.mark(order.id, &note, false).await? {
                changed += 1;
            }
        }

        tracing::info!(
            product_id = %event.product_id,
            orders = changed,
            "orders affected by product deletion"
        );
        metrics::counter!("orders_marked_affected_total", "cause" => "product_deleted")
            .increment(changed as u64);
        Ok(changed)
    }

    /// Marks one order, reloading it when a concurrent writer got there
    /// first. Returns false if the order needed no change or is gone.
    async fn mark(&self, order_id: OrderId, note: &str, user_deleted: bool) -> Result<bool> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(mut order) = self.orders.get(order_id).await? else {
                return Ok(false);
            };
            if !order.mark_affected(note, user_deleted) {
                return Ok(false);
            }

            match self.orders.update(&order).await {
                Ok(_) => return Ok(true),
                Err(RepositoryError::VersionConflict { .. }) => {
                    metrics::counter!("order_update_conflicts_total").increment(1);
                }
                Err(RepositoryError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        Err(SagaError::Conflict {
            order_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }
}

#[async_trait]
impl MessageHandler for DeletionReconciler {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let outcome = match delivery.routing_key.as_str() {
            routing::USER_DELETED => {
                let event: UserDeleted = delivery.json()?;
                self.on_user_deleted(event.user_id).await
            }
            routing::PRODUCT_DELETED => {
                let event: ProductDeleted = delivery.json()?;
                self.on_product_deleted(&event).await
            }
            other => {
                tracing::debug!(routing_key = other, "ignoring event");
                return Ok(());
            }
        };

        outcome
            .map(|_| ())
            .map_err(|e| HandlerError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use domain::{InMemoryOrderRepository, Money, NewOrder, OrderItem, OrderStatus};

    fn item(product: i64, name: &str) -> OrderItem {
        OrderItem::new(ProductId::new(product), 1, name, Money::from_cents(1000))
    }

    async fn setup() -> (Arc<InMemoryOrderRepository>, DeletionReconciler) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let reconciler = DeletionReconciler::new(repo.clone());
        (repo, reconciler)
    }

    #[tokio::test]
    async fn test_user_deletion_marks_open_orders_only() {
        let (repo, reconciler) = setup().await;
        let open = repo
            .insert(NewOrder::new(UserId::new(5), vec![item(1, "Laptop")]).unwrap())
            .await
            .unwrap();
        let done = repo
            .insert(
                NewOrder::historical(UserId::new(5), OrderStatus::Completed, vec![item(1, "Laptop")])
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(reconciler.on_user_deleted(UserId::new(5)).await.unwrap(), 1);

        let open = repo.get(open.id).await.unwrap().unwrap();
        assert_eq!(open.status, OrderStatus::Affected);
        assert_eq!(open.status_note.as_deref(), Some(USER_DELETED_NOTE));
        assert!(open.user_deleted);

        let done = repo.get(done.id).await.unwrap().unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
        assert!(!done.user_deleted);
    }

    #[tokio::test]
    async fn test_product_deletion_updates_each_order_once() {
        let (repo, reconciler) = setup().await;
        let order = repo
            .insert(
                NewOrder::new(UserId::new(1), vec![item(9, "Widget"), item(9, "Widget")]).unwrap(),
            )
            .await
            .unwrap();

        let event = ProductDeleted {
            product_id: ProductId::new(9),
            product_name: Some("Widget".to_string()),
        };
        assert_eq!(reconciler.on_product_deleted(&event).await.unwrap(), 1);

        let stored = repo.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.version, order.version + 1);
        assert_eq!(
            stored.status_note.as_deref(),
            Some("Product Widget is no longer available")
        );
    }

    #[tokio::test]
    async fn test_repeated_deletion_changes_nothing() {
        let (repo, reconciler) = setup().await;
        let order = repo
            .insert(NewOrder::new(UserId::new(2), vec![item(1, "Laptop")]).unwrap())
            .await
            .unwrap();

        assert_eq!(reconciler.on_user_deleted(UserId::new(2)).await.unwrap(), 1);
        let first = repo.get(order.id).await.unwrap().unwrap();

        assert_eq!(reconciler.on_user_deleted(UserId::new(2)).await.unwrap(), 0);
        assert_eq!(repo.get(order.id).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_handler_dispatches_on_routing_key() {
        let (repo, reconciler) = setup().await;
        let order = repo
            .insert(NewOrder::new(UserId::new(3), vec![item(1, "Laptop")]).unwrap())
            .await
            .unwrap();

        let delivery = Delivery {
            exchange: "user_events".to_string(),
            routing_key: "user.deleted".to_string(),
            payload: br#"{"userId": 3}"#.to_vec(),
            redelivered: false,
            handler_failures: 0,
            delivery_tag: 1,
        };
        reconciler.handle(&delivery).await.unwrap();
        assert_eq!(
            repo.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Affected
        );

        let unrelated = Delivery {
            routing_key: "user.updated".to_string(),
            ..delivery
        };
        assert!(reconciler.handle(&unrelated).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_handler() {
        let (_repo, reconciler) = setup().await;
        let delivery = Delivery {
            exchange: "product_events".to_string(),
            routing_key: "product.deleted".to_string(),
            payload: b"{}".to_vec(),
            redelivered: false,
            handler_failures: 0,
            delivery_tag: 1,
        };
        assert!(reconciler.handle(&delivery).await.is_err());
    }
}
