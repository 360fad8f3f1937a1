//! Saga error types.

use common::{OrderId, ProductId, UserId};
use domain::{OrderError, RepositoryError};
use event_bus::BusError;
use serde::Serialize;
use thiserror::Error;

/// Broad class of a failure, used to pick the response a caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or missing request fields. Nothing changed.
    Validation,
    /// A referenced user or product does not exist.
    Referential,
    /// A product cannot cover the requested quantity.
    InsufficientStock,
    /// Broker, database or collaborator unavailable.
    Infrastructure,
    /// The order does not exist.
    NotFound,
    /// Concurrent writers kept winning.
    Conflict,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Returns the category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Referential => "referential",
            ErrorCategory::InsufficientStock => "insufficient_stock",
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request is malformed.
    #[error("{0}")]
    Validation(String),

    /// The order could not be built.
    #[error("{0}")]
    InvalidOrder(#[from] OrderError),

    /// The referenced user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The referenced product does not exist.
    #[error("Product with ID {0} not found")]
    ProductNotFound(ProductId),

    /// A product does not have enough stock.
    #[error("Not enough stock for product {product_name}. Available: {available}")]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        requested: u32,
        available: i64,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An update kept losing to concurrent writers.
    #[error("Order {order_id} was modified concurrently {attempts} times, giving up")]
    Conflict { order_id: OrderId, attempts: u32 },

    /// A collaborating service failed or timed out.
    #[error("{service} service error: {reason}")]
    Collaborator {
        service: &'static str,
        reason: String,
    },

    /// Repository error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
}

impl SagaError {
    /// Returns the broad class of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SagaError::Validation(_) | SagaError::InvalidOrder(_) => ErrorCategory::Validation,
            SagaError::UserNotFound(_) | SagaError::ProductNotFound(_) => {
                ErrorCategory::Referential
            }
            SagaError::InsufficientStock { .. } => ErrorCategory::InsufficientStock,
            SagaError::OrderNotFound(_) => ErrorCategory::NotFound,
            SagaError::Conflict { .. } => ErrorCategory::Conflict,
            SagaError::Collaborator { .. } | SagaError::Bus(_) => ErrorCategory::Infrastructure,
            SagaError::Repository(e) => match e {
                RepositoryError::NotFound(_) => ErrorCategory::NotFound,
                RepositoryError::VersionConflict { .. } => ErrorCategory::Conflict,
                RepositoryError::Database(_) | RepositoryError::Migration(_) => {
                    ErrorCategory::Infrastructure
                }
                RepositoryError::Corrupt(_) => ErrorCategory::Internal,
            },
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
