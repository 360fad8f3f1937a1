//! Order entity, status rules and value objects.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order, StatusChange};
pub use state::{Compensation, OrderStatus};
pub use value_objects::{Money, OrderItem};

use common::ProductId;
use thiserror::Error;

/// Errors that can occur when building or changing an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Orders can only be created as pending or processing.
    #[error("Orders cannot be created with status '{0}'")]
    InvalidEntryStatus(OrderStatus),

    /// Status name not recognized.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// Money amount that is negative or not a number.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}
