//! Repository error types.

use common::OrderId;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur when reading or writing orders.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No order with this id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order changed since it was read.
    #[error("Version conflict for order {order_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: i64,
        actual: i64,
    },

    /// A stored row could not be turned back into an order.
    #[error("Corrupt order row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<OrderError> for RepositoryError {
    fn from(e: OrderError) -> Self {
        RepositoryError::Corrupt(e.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
