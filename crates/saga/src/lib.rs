//! Order saga for the orders service.
//!
//! Orders own their lifecycle, but stock belongs to the products service and
//! users to the users service. This crate keeps the three consistent over an
//! at-least-once event bus:
//!
//! 1. [`OrderSaga`] validates and persists orders, claims stock with
//!    `inventory.reserved`, and confirms or restores it when an order first
//!    completes, is cancelled, or is deleted.
//! 2. [`DeletionReconciler`] marks open orders `affected` when a referenced
//!    user or product is deleted.
//! 3. [`SagaBootstrap`] keeps a bus connection installed and re-subscribes the
//!    reconciler after every reconnect.

pub mod bootstrap;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod reservation;
pub mod services;

pub use bootstrap::SagaBootstrap;
pub use coordinator::{CreateOrder, MAX_UPDATE_ATTEMPTS, OrderLine, OrderSaga};
pub use error::{ErrorCategory, Result, SagaError};
pub use reconciler::DeletionReconciler;
pub use reservation::{InventoryReservations, ReservationPath};
pub use services::{
    HttpProductCatalog, HttpUserDirectory, InMemoryProductCatalog, InMemoryUserDirectory, Product,
    ProductCatalog, User, UserDirectory,
};
