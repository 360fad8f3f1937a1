use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, ProductId, UserId};
use tokio::sync::RwLock;

use super::OrderRepository;
use crate::error::{RepositoryError, Result};
use crate::order::{NewOrder, Order};

#[derive(Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    last_id: i64,
}

/// In-memory order repository for testing and single-process runs.
///
/// Behaves like the PostgreSQL implementation, including version checks.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn len(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns true if no orders are stored.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.orders.is_empty()
    }

    async fn filtered(&self, keep: impl Fn(&Order) -> bool + Send) -> Vec<Order> {
        self.state
            .read()
            .await
            .orders
            .values()
            .filter(|order| keep(*order))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let id = OrderId::new(state.last_id);

        let order = Order::from_new(id, order, Utc::now());
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Order>> {
        Ok(self.filtered(|_| true).await)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.filtered(|order| order.user_id == user_id).await)
    }

    async fn open_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self
            .filtered(|order| order.user_id == user_id && !order.status.is_terminal())
            .await)
    }

    async fn open_orders_with_product(&self, product_id: ProductId) -> Result<Vec<Order>> {
        Ok(self
            .filtered(|order| !order.status.is_terminal() && order.contains_product(product_id))
            .await)
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id)
            .ok_or(RepositoryError::NotFound(order.id))?;

        if stored.version != order.version {
            return Err(RepositoryError::VersionConflict {
                order_id: order.id,
                expected: order.version,
                actual: stored.version,
            });
        }

        // Identity, items and total are immutable after creation.
        stored.status = order.status;
        stored.status_note = order.status_note.clone();
        stored.user_deleted = order.user_deleted;
        stored.inventory_settled = order.inventory_settled;
        stored.updated_at = Utc::now();
        stored.version += 1;

        Ok(stored.clone())
    }

    async fn delete(&self, id: OrderId, expected_version: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state.orders.get(&id).ok_or(RepositoryError::NotFound(id))?;

        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                order_id: id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        state.orders.remove(&id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.clear();
        state.last_id = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Money, OrderItem, OrderStatus};

    fn new_order(user: i64, product: i64) -> NewOrder {
        NewOrder::new(
            UserId::new(user),
            vec![OrderItem::new(
                ProductId::new(product),
                1,
                "Widget",
                Money::from_cents(500),
            )],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let repo = InMemoryOrderRepository::new();
        let first = repo.insert(new_order(1, 1)).await.unwrap();
        let second = repo.insert(new_order(1, 2)).await.unwrap();

        assert_eq!(first.id, OrderId::new(1));
        assert_eq!(second.id, OrderId::new(2));
        assert_eq!(first.version, 1);
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let repo = InMemoryOrderRepository::new();
        let mut order = repo.insert(new_order(1, 1)).await.unwrap();

        order.transition(OrderStatus::Shipped);
        let stored = repo.update(&order).await.unwrap();

        assert_eq!(stored.version, 2);
        assert_eq!(stored.status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(new_order(1, 1)).await.unwrap();

        let mut first = order.clone();
        first.transition(OrderStatus::Shipped);
        repo.update(&first).await.unwrap();

        let mut second = order;
        second.transition(OrderStatus::Cancelled);
        let result = repo.update(&second).await;

        assert!(matches!(
            result,
            Err(RepositoryError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        let stored = repo.get(second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn update_ignores_items_and_total() {
        let repo = InMemoryOrderRepository::new();
        let mut order = repo.insert(new_order(1, 1)).await.unwrap();

        order.items.clear();
        order.total_amount = Money::zero();
        let stored = repo.update(&order).await.unwrap();

        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.total_amount.cents(), 500);
    }

    #[tokio::test]
    async fn delete_checks_version() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(new_order(1, 1)).await.unwrap();

        assert!(matches!(
            repo.delete(order.id, 7).await,
            Err(RepositoryError::VersionConflict { .. })
        ));
        repo.delete(order.id, order.version).await.unwrap();
        assert!(repo.get(order.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(order.id, order.version).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_order_queries_skip_terminal() {
        let repo = InMemoryOrderRepository::new();
        let open = repo.insert(new_order(7, 101)).await.unwrap();
        let mut done = repo.insert(new_order(7, 101)).await.unwrap();
        repo.insert(new_order(8, 102)).await.unwrap();

        done.transition(OrderStatus::Completed);
        repo.update(&done).await.unwrap();

        let by_user = repo.open_orders_for_user(UserId::new(7)).await.unwrap();
        assert_eq!(by_user.iter().map(|o| o.id).collect::<Vec<_>>(), vec![open.id]);

        let by_product = repo
            .open_orders_with_product(ProductId::new(101))
            .await
            .unwrap();
        assert_eq!(by_product.iter().map(|o| o.id).collect::<Vec<_>>(), vec![open.id]);

        assert_eq!(repo.list_by_user(UserId::new(7)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clear_resets_ids() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(new_order(1, 1)).await.unwrap();
        repo.clear().await.unwrap();

        assert!(repo.is_empty().await);
        let order = repo.insert(new_order(1, 1)).await.unwrap();
        assert_eq!(order.id, OrderId::new(1));
    }
}
