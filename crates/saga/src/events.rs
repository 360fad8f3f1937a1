//! Events exchanged with the other services.
//!
//! Every event kind has one payload shape. Order events all carry `orderId`
//! and `userId` at the top level; `order.created` adds the full order.

use common::{OrderId, ProductId, UserId};
use domain::{Compensation, Order, OrderStatus};
use serde::{Deserialize, Serialize};

/// Exchange for order lifecycle events. Owned by this service.
pub const ORDER_EVENTS: &str = "order_events";
/// Exchange for stock reservations. Owned by this service.
pub const INVENTORY_EVENTS: &str = "inventory_events";
/// Exchange the users service publishes to.
pub const USER_EVENTS: &str = "user_events";
/// Exchange the products service publishes to.
pub const PRODUCT_EVENTS: &str = "product_events";

/// Routing keys.
pub mod routing {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_UPDATED: &str = "order.status_updated";
    pub const ORDER_DELETED: &str = "order.deleted";
    pub const INVENTORY_RESERVED: &str = "inventory.reserved";
    pub const INVENTORY_CONFIRMED: &str = "inventory.confirmed";
    pub const INVENTORY_RESTORED: &str = "inventory.restored";
    pub const USER_DELETED: &str = "user.deleted";
    pub const PRODUCT_DELETED: &str = "product.deleted";
}

/// Shared queues this service consumes from.
pub mod queues {
    pub const USER_EVENTS: &str = "orders-user-events";
    pub const PRODUCT_EVENTS: &str = "orders-product-events";
}

/// `order.created`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub order: Order,
}

impl OrderCreated {
    pub fn new(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            order: order.clone(),
        }
    }
}

/// `order.status_updated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdated {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

/// `order.deleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeleted {
    pub order_id: OrderId,
    pub user_id: UserId,
}

/// The three phases of a stock claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryEventKind {
    Reserved,
    Confirmed,
    Restored,
}

impl InventoryEventKind {
    /// Returns the routing key for this kind.
    pub fn routing_key(&self) -> &'static str {
        match self {
            InventoryEventKind::Reserved => routing::INVENTORY_RESERVED,
            InventoryEventKind::Confirmed => routing::INVENTORY_CONFIRMED,
            InventoryEventKind::Restored => routing::INVENTORY_RESTORED,
        }
    }

    /// Parses a routing key.
    pub fn from_routing_key(key: &str) -> Option<Self> {
        match key {
            routing::INVENTORY_RESERVED => Some(InventoryEventKind::Reserved),
            routing::INVENTORY_CONFIRMED => Some(InventoryEventKind::Confirmed),
            routing::INVENTORY_RESTORED => Some(InventoryEventKind::Restored),
            _ => None,
        }
    }

    /// Returns the name used in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryEventKind::Reserved => "reserved",
            InventoryEventKind::Confirmed => "confirmed",
            InventoryEventKind::Restored => "restored",
        }
    }
}

impl From<Compensation> for InventoryEventKind {
    fn from(compensation: Compensation) -> Self {
        match compensation {
            Compensation::Confirm => InventoryEventKind::Confirmed,
            Compensation::Restore => InventoryEventKind::Restored,
        }
    }
}

/// `inventory.reserved`, `inventory.confirmed` and `inventory.restored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEvent {
    pub product_id: ProductId,
    pub quantity: u32,
    pub order_id: OrderId,
}

/// `user.deleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: UserId,
}

/// `product.deleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDeleted {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl ProductDeleted {
    /// Returns the note written on orders that referenced the product.
    pub fn status_note(&self) -> String {
        match self.product_name.as_deref() {
            Some(name) if !name.is_empty() => format!("Product {name} is no longer available"),
            _ => format!("Product {} is no longer available", self.product_id),
        }
    }
}

/// Note written on orders whose user was deleted.
pub const USER_DELETED_NOTE: &str = "User account has been deleted";
