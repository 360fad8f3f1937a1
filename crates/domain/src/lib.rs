//! Domain layer for the orders service.
//!
//! This crate provides:
//! - The `Order` entity with its item snapshots and status rules
//! - `Money` and `OrderItem` value objects
//! - The `OrderRepository` trait with version-checked writes
//! - In-memory and PostgreSQL repositories

pub mod error;
pub mod order;
pub mod repository;

pub use error::{RepositoryError, Result};
pub use order::{
    Compensation, Money, NewOrder, Order, OrderError, OrderItem, OrderStatus, StatusChange,
};
pub use repository::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
