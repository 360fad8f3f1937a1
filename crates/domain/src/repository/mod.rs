//! Order persistence.

mod memory;
mod postgres;

pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};

use crate::error::Result;
use crate::order::{NewOrder, Order};

/// Storage for orders.
///
/// Every change is conditional on the version the caller read, so two
/// concurrent writers cannot silently overwrite each other: the loser gets
/// [`RepositoryError::VersionConflict`](crate::RepositoryError::VersionConflict)
/// and is expected to reload and retry.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order and returns it with its assigned id.
    async fn insert(&self, order: NewOrder) -> Result<Order>;

    /// Gets an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists all orders, oldest first.
    async fn list(&self) -> Result<Vec<Order>>;

    /// Lists the orders of one user, oldest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Lists the user's orders that are not completed or cancelled.
    async fn open_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Lists the distinct orders that are not completed or cancelled and
    /// have at least one item for the product.
    async fn open_orders_with_product(&self, product_id: ProductId) -> Result<Vec<Order>>;

    /// Persists the mutable fields of `order` if its stored version still
    /// equals `order.version`. Returns the stored order with the new version.
    async fn update(&self, order: &Order) -> Result<Order>;

    /// Deletes the order if its stored version equals `expected_version`.
    async fn delete(&self, id: OrderId, expected_version: i64) -> Result<()>;

    /// Removes every order.
    async fn clear(&self) -> Result<()>;
}
