//! The order entity.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{Compensation, Money, OrderError, OrderItem, OrderStatus};

/// An order as persisted by the orders service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Assigned by the repository at creation.
    pub id: OrderId,

    /// Owner of the order. Not owned by this service.
    pub user_id: UserId,

    /// Sum of the item snapshots at creation. Never recomputed.
    pub total_amount: Money,

    /// Current status.
    pub status: OrderStatus,

    /// Explanation set by the deletion reconciler.
    pub status_note: Option<String>,

    /// Set once the owning user was deleted. Never cleared.
    pub user_deleted: bool,

    /// True once the order's reservations were confirmed or restored.
    pub inventory_settled: bool,

    /// Line items with their price snapshots.
    pub items: Vec<OrderItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Incremented on every persisted change; updates are conditional on it.
    pub version: i64,
}

/// Outcome of a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: OrderStatus,
    pub current: OrderStatus,
    /// Inventory action the transition owes, if any.
    pub compensation: Option<Compensation>,
}

impl StatusChange {
    /// Returns true if the status did not change.
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }
}

impl Order {
    /// Builds the stored form of a new order.
    pub fn from_new(id: OrderId, new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            total_amount: new.total_amount,
            status: new.status,
            status_note: None,
            user_deleted: false,
            inventory_settled: new.inventory_settled,
            items: new.items,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Moves the order to `target`.
    ///
    /// Re-applying the current status changes nothing. The first move into
    /// `completed` or `cancelled` owes a compensation; after that the order's
    /// inventory is settled and later moves owe nothing, whatever the status.
    pub fn transition(&mut self, target: OrderStatus) -> StatusChange {
        let previous = self.status;
        if previous == target {
            return StatusChange {
                previous,
                current: target,
                compensation: None,
            };
        }

        let compensation = if self.inventory_settled {
            None
        } else {
            Compensation::for_target(target)
        };
        if compensation.is_some() {
            self.inventory_settled = true;
        }

        self.status = target;
        StatusChange {
            previous,
            current: target,
            compensation,
        }
    }

    /// Returns the compensation owed if the order is deleted now.
    pub fn deletion_compensation(&self) -> Option<Compensation> {
        (!self.inventory_settled).then_some(Compensation::Restore)
    }

    /// Flags the order as affected by an upstream deletion.
    ///
    /// Terminal orders are left alone. Returns true if anything changed, so a
    /// repeated deletion event does not rewrite the order.
    pub fn mark_affected(&mut self, note: &str, user_deleted: bool) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let changed = self.status != OrderStatus::Affected
            || self.status_note.as_deref() != Some(note)
            || (user_deleted && !self.user_deleted);

        self.status = OrderStatus::Affected;
        self.status_note = Some(note.to_string());
        self.user_deleted |= user_deleted;
        changed
    }

    /// Returns true if any item references the product.
    pub fn contains_product(&self, product_id: ProductId) -> bool {
        self.items.iter().any(|item| item.product_id == product_id)
    }
}

/// A validated order that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub inventory_settled: bool,
}

impl NewOrder {
    /// Creates a `processing` order from priced items.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        Self::validate_items(&items)?;
        let total_amount = items.iter().map(OrderItem::total_price).sum();

        Ok(Self {
            user_id,
            status: OrderStatus::Processing,
            items,
            total_amount,
            inventory_settled: false,
        })
    }

    /// Overrides the entry status. Only `pending` and `processing` are allowed.
    pub fn with_status(mut self, status: OrderStatus) -> Result<Self, OrderError> {
        if !status.is_entry() {
            return Err(OrderError::InvalidEntryStatus(status));
        }
        self.status = status;
        Ok(self)
    }

    /// Creates an order that already went through part of its lifecycle,
    /// such as sample data. Terminal orders start settled.
    pub fn historical(
        user_id: UserId,
        status: OrderStatus,
        items: Vec<OrderItem>,
    ) -> Result<Self, OrderError> {
        let mut order = Self::new(user_id, items)?;
        order.status = status;
        order.inventory_settled = status.is_terminal();
        Ok(order)
    }

    fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id,
                quantity: item.quantity,
            });
        }
        Ok(())
    }
}
