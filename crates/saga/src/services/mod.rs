//! Collaborating services: users and products.

mod http;
pub mod products;
pub mod users;

pub use products::{HttpProductCatalog, InMemoryProductCatalog, Product, ProductCatalog};
pub use users::{HttpUserDirectory, InMemoryUserDirectory, User, UserDirectory};
