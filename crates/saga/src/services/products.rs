//! Product lookups and the stock ledger.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::Money;
use event_bus::{Delivery, HandlerError, MessageHandler};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http;
use crate::error::{Result, SagaError};
use crate::events::{InventoryEvent, InventoryEventKind};

/// Attempts a stock write makes before giving up on concurrent writers.
const MAX_STOCK_WRITE_ATTEMPTS: u32 = 5;

/// The parts of a product record the orders service reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: Money,
    pub stock: i64,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money, stock: i64) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Trait for product lookups and direct stock changes.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the product, or `None` if it does not exist.
    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Takes `quantity` units out of stock without going through the bus.
    ///
    /// Only used when the bus is down.
    async fn decrement_stock(&self, product_id: ProductId, quantity: u32) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StockEntry {
    product: Product,
    version: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductId, StockEntry>,
    applied: HashSet<(OrderId, ProductId, InventoryEventKind)>,
    /// Reservations that took nothing because stock ran short.
    rejected: HashSet<(OrderId, ProductId)>,
    confirmed: HashMap<ProductId, u64>,
}

/// In-process product catalog that also owns stock.
///
/// Applies inventory events the way the products service does. Each
/// `(order, product, kind)` is applied at most once, so redelivered events
/// leave stock untouched. A reservation refused for lack of stock makes the
/// later restore or confirmation of the same line a no-op. Stock writes are conditional on the entry's
/// version and retried when another writer got there first.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryProductCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the demo product range.
    pub fn with_sample_products() -> Self {
        let catalog = Self::new();
        let samples: [(&str, i64, i64); 8] = [
            ("Laptop", 99999, 10),
            ("Smartphone", 69999, 25),
            ("Headphones", 19999, 50),
            ("Coffee Maker", 8999, 15),
            ("Running Shoes", 12999, 30),
            ("Bluetooth Speaker", 5999, 20),
            ("Yoga Mat", 2999, 40),
            ("Desk Lamp", 2499, 35),
        ];
        for (id, (name, cents, stock)) in (1..).zip(samples) {
            catalog.add_product(
                ProductId::new(id),
                Product::new(name, Money::from_cents(cents), stock),
            );
        }
        catalog
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces a product.
    pub fn add_product(&self, product_id: ProductId, product: Product) {
        self.lock()
            .products
            .insert(product_id, StockEntry { product, version: 0 });
    }

    /// Removes a product.
    pub fn remove_product(&self, product_id: ProductId) {
        self.lock().products.remove(&product_id);
    }

    /// Returns the current stock of a product.
    pub fn stock(&self, product_id: ProductId) -> Option<i64> {
        self.lock().products.get(&product_id).map(|e| e.product.stock)
    }

    /// Returns how many units of a product were confirmed as sold.
    pub fn confirmed_units(&self, product_id: ProductId) -> u64 {
        self.lock().confirmed.get(&product_id).copied().unwrap_or(0)
    }

    fn read(&self, product_id: ProductId) -> Option<StockEntry> {
        self.lock().products.get(&product_id).cloned()
    }

    /// Stores `stock` if the entry is still at `expected_version`.
    fn write_if(&self, product_id: ProductId, expected_version: u64, stock: i64) -> bool {
        let mut state = self.lock();
        match state.products.get_mut(&product_id) {
            Some(entry) if entry.version == expected_version => {
                entry.product.stock = stock;
                entry.version += 1;
                true
            }
            _ => false,
        }
    }

    /// Adds `delta` to the stock with a conditional write, refusing to go
    /// below zero. Returns the new stock.
    fn adjust_stock(&self, product_id: ProductId, delta: i64) -> Result<i64> {
        for _ in 0..MAX_STOCK_WRITE_ATTEMPTS {
            let entry = self
                .read(product_id)
                .ok_or(SagaError::ProductNotFound(product_id))?;

            let stock = entry.product.stock + delta;
            if stock < 0 {
                return Err(SagaError::InsufficientStock {
                    product_id,
                    product_name: entry.product.name,
                    requested: u32::try_from(-delta).unwrap_or(u32::MAX),
                    available: entry.product.stock,
                });
            }

            if self.write_if(product_id, entry.version, stock) {
                return Ok(stock);
            }
            tracing::debug!(%product_id, "stock changed concurrently, retrying");
        }

        Err(SagaError::Collaborator {
            service: "products",
            reason: format!("stock of product {product_id} kept changing, giving up"),
        })
    }

    /// Applies one inventory event. Returns false if it was applied before or
    /// settles a reservation that was refused.
    pub fn apply(&self, kind: InventoryEventKind, event: InventoryEvent) -> Result<bool> {
        let line = (event.order_id, event.product_id);
        let key = (event.order_id, event.product_id, kind);
        {
            let mut state = self.lock();
            if !state.applied.insert(key) {
                tracing::debug!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    kind = kind.as_str(),
                    "inventory event already applied"
                );
                return Ok(false);
            }
            if kind != InventoryEventKind::Reserved && state.rejected.contains(&line) {
                tracing::debug!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    kind = kind.as_str(),
                    "reservation was refused, nothing to settle"
                );
                return Ok(false);
            }
        }

        let quantity = i64::from(event.quantity);
        let outcome = match kind {
            InventoryEventKind::Reserved => {
                let reserved = self.adjust_stock(event.product_id, -quantity);
                match &reserved {
                    Ok(_) => self.lock().rejected.remove(&line),
                    Err(SagaError::InsufficientStock { .. }) => self.lock().rejected.insert(line),
                    Err(_) => false,
                };
                reserved
            }
            InventoryEventKind::Restored => self.adjust_stock(event.product_id, quantity),
            InventoryEventKind::Confirmed => {
                *self.lock().confirmed.entry(event.product_id).or_default() +=
                    u64::from(event.quantity);
                Ok(0)
            }
        };

        if let Err(e) = outcome {
            self.lock().applied.remove(&key);
            return Err(e);
        }
        Ok(true)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.read(product_id).map(|entry| entry.product))
    }

    async fn decrement_stock(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        self.adjust_stock(product_id, -i64::from(quantity)).map(|_| ())
    }
}

#[async_trait]
impl MessageHandler for InMemoryProductCatalog {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let Some(kind) = InventoryEventKind::from_routing_key(&delivery.routing_key) else {
            return Ok(());
        };
        let event: InventoryEvent = delivery.json()?;

        match self.apply(kind, event) {
            Ok(_) => Ok(()),
            // Retrying cannot create stock; the refusal is recorded by `apply`.
            Err(e @ SagaError::InsufficientStock { .. }) => {
                tracing::warn!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    error = %e,
                    "reservation exceeds stock, ignoring"
                );
                Ok(())
            }
            Err(e) => Err(HandlerError::new(e.to_string())),
        }
    }
}

#[derive(Serialize)]
struct StockUpdate {
    stock: i64,
}

/// Products service client.
///
/// Reads `GET {base_url}/{id}` and writes stock with `PUT {base_url}/{id}`.
/// The service offers no conditional write, so a direct decrement can race
/// with other writers.
#[derive(Debug, Clone)]
pub struct HttpProductCatalog {
    client: Client,
    base_url: String,
}

impl HttpProductCatalog {
    const SERVICE: &'static str = "products";

    /// Creates a client for the products service.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(Self::SERVICE, timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    #[tracing::instrument(skip(self))]
    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let url = http::resource_url(&self.base_url, product_id);
        http::get_optional(&self.client, Self::SERVICE, &url).await
    }

    #[tracing::instrument(skip(self))]
    async fn decrement_stock(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        let product = self
            .find_product(product_id)
            .await?
            .ok_or(SagaError::ProductNotFound(product_id))?;

        let stock = product.stock - i64::from(quantity);
        if stock < 0 {
            return Err(SagaError::InsufficientStock {
                product_id,
                product_name: product.name,
                requested: quantity,
                available: product.stock,
            });
        }

        let url = http::resource_url(&self.base_url, product_id);
        let response = self
            .client
            .put(&url)
            .json(&StockUpdate { stock })
            .send()
            .await
            .map_err(|e| SagaError::Collaborator {
                service: Self::SERVICE,
                reason: format!("stock update failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(SagaError::Collaborator {
                service: Self::SERVICE,
                reason: format!("{url} returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(order: i64, product: i64, quantity: u32) -> InventoryEvent {
        InventoryEvent {
            product_id: ProductId::new(product),
            quantity,
            order_id: OrderId::new(order),
        }
    }

    #[tokio::test]
    async fn test_sample_products() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        let laptop = catalog.find_product(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(laptop.name, "Laptop");
        assert_eq!(laptop.price.cents(), 99999);
        assert_eq!(laptop.stock, 10);
        assert_eq!(catalog.stock(ProductId::new(8)), Some(35));
        assert!(catalog.find_product(ProductId::new(9)).await.unwrap().is_none());
    }

    #[test]
    fn test_reserve_then_restore() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        catalog
            .apply(InventoryEventKind::Reserved, event(1, 1, 2))
            .unwrap();
        assert_eq!(catalog.stock(ProductId::new(1)), Some(8));

        catalog
            .apply(InventoryEventKind::Restored, event(1, 1, 2))
            .unwrap();
        assert_eq!(catalog.stock(ProductId::new(1)), Some(10));
    }

    #[test]
    fn test_events_apply_once() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        assert!(catalog.apply(InventoryEventKind::Reserved, event(1, 3, 5)).unwrap());
        assert!(!catalog.apply(InventoryEventKind::Reserved, event(1, 3, 5)).unwrap());
        assert!(catalog.apply(InventoryEventKind::Restored, event(1, 3, 5)).unwrap());
        assert!(!catalog.apply(InventoryEventKind::Restored, event(1, 3, 5)).unwrap());
        assert_eq!(catalog.stock(ProductId::new(3)), Some(50));

        assert!(catalog.apply(InventoryEventKind::Confirmed, event(2, 3, 1)).unwrap());
        assert!(!catalog.apply(InventoryEventKind::Confirmed, event(2, 3, 1)).unwrap());
        assert_eq!(catalog.confirmed_units(ProductId::new(3)), 1);
    }

    #[test]
    fn test_same_product_different_orders_both_apply() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        catalog.apply(InventoryEventKind::Reserved, event(1, 2, 1)).unwrap();
        catalog.apply(InventoryEventKind::Reserved, event(2, 2, 1)).unwrap();
        assert_eq!(catalog.stock(ProductId::new(2)), Some(23));
    }

    fn inventory_delivery(kind: InventoryEventKind, event: InventoryEvent) -> Delivery {
        Delivery {
            exchange: "inventory_events".to_string(),
            routing_key: kind.routing_key().to_string(),
            payload: serde_json::to_vec(&event).unwrap(),
            redelivered: false,
            handler_failures: 0,
            delivery_tag: 1,
        }
    }

    #[tokio::test]
    async fn test_restore_after_refused_reservation_creates_no_stock() {
        let catalog = InMemoryProductCatalog::new();
        catalog.add_product(
            ProductId::new(1),
            Product::new("Widget", Money::from_cents(100), 1),
        );

        catalog
            .handle(&inventory_delivery(InventoryEventKind::Reserved, event(7, 1, 5)))
            .await
            .unwrap();
        assert_eq!(catalog.stock(ProductId::new(1)), Some(1));

        catalog
            .handle(&inventory_delivery(InventoryEventKind::Restored, event(7, 1, 5)))
            .await
            .unwrap();
        assert_eq!(catalog.stock(ProductId::new(1)), Some(1));

        assert!(!catalog.apply(InventoryEventKind::Confirmed, event(7, 1, 5)).unwrap());
        assert_eq!(catalog.confirmed_units(ProductId::new(1)), 0);
    }

    #[test]
    fn test_restore_without_reservation_event_still_applies() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        assert!(catalog.apply(InventoryEventKind::Restored, event(3, 4, 2)).unwrap());
        assert_eq!(catalog.stock(ProductId::new(4)), Some(17));
    }

    #[test]
    fn test_reservation_retried_after_refusal_can_be_restored() {
        let catalog = InMemoryProductCatalog::new();
        catalog.add_product(
            ProductId::new(1),
            Product::new("Widget", Money::from_cents(100), 1),
        );
        assert!(catalog.apply(InventoryEventKind::Reserved, event(7, 1, 2)).is_err());

        catalog.add_product(
            ProductId::new(1),
            Product::new("Widget", Money::from_cents(100), 5),
        );
        assert!(catalog.apply(InventoryEventKind::Reserved, event(7, 1, 2)).unwrap());
        assert_eq!(catalog.stock(ProductId::new(1)), Some(3));

        assert!(catalog.apply(InventoryEventKind::Restored, event(7, 1, 2)).unwrap());
        assert_eq!(catalog.stock(ProductId::new(1)), Some(5));
    }

    #[tokio::test]
    async fn test_decrement_refuses_negative_stock() {
        let catalog = InMemoryProductCatalog::new();
        catalog.add_product(
            ProductId::new(1),
            Product::new("Widget", Money::from_cents(100), 1),
        );

        let result = catalog.decrement_stock(ProductId::new(1), 2).await;
        assert!(matches!(
            result,
            Err(SagaError::InsufficientStock { available: 1, .. })
        ));
        assert_eq!(catalog.stock(ProductId::new(1)), Some(1));
    }

    #[test]
    fn test_stale_write_is_rejected() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        let entry = catalog.read(ProductId::new(1)).unwrap();
        assert!(catalog.write_if(ProductId::new(1), entry.version, 9));
        assert!(!catalog.write_if(ProductId::new(1), entry.version, 5));
        assert_eq!(catalog.stock(ProductId::new(1)), Some(9));
    }

    #[test]
    fn test_product_record_tolerates_foreign_fields() {
        let product: Product = serde_json::from_str(
            r#"{"_id": "abc", "name": "Laptop", "price": 999.99, "stock": 10, "category": "Electronics"}"#,
        )
        .unwrap();
        assert_eq!(product.price.cents(), 99999);
    }

    #[tokio::test]
    async fn test_handler_ignores_unrelated_keys() {
        let catalog = InMemoryProductCatalog::with_sample_products();
        let delivery = Delivery {
            exchange: "inventory_events".to_string(),
            routing_key: "inventory.audited".to_string(),
            payload: b"not json".to_vec(),
            redelivered: false,
            handler_failures: 0,
            delivery_tag: 1,
        };
        assert!(catalog.handle(&delivery).await.is_ok());
    }
}
