//! Identifiers shared across the order saga crates.

mod types;

pub use types::{OrderId, ProductId, UserId};
