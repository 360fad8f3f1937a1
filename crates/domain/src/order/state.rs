//! Order status and the rules attached to it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of an order in its lifecycle.
///
/// ```text
/// pending ─┐
///          ├──► shipped ──► delivered ──► completed
/// processing                              cancelled
///
///   any non-terminal status ──(upstream deletion)──► affected
/// ```
///
/// Transitions are permissive: any status may be requested from any other,
/// except `affected`, which only the deletion reconciler sets. `completed`
/// and `cancelled` are terminal for inventory purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted, not yet picked up.
    Pending,

    /// Stock reserved and being prepared.
    #[default]
    Processing,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Finalized; reserved stock is confirmed.
    Completed,

    /// Abandoned; reserved stock is returned.
    Cancelled,

    /// A referenced user or product was deleted while the order was open.
    Affected,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Affected,
    ];

    /// Returns true for `completed` and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if an order may be created in this status.
    pub fn is_entry(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns true if callers may request this status directly.
    pub fn is_requestable(&self) -> bool {
        !matches!(self, OrderStatus::Affected)
    }

    /// Returns the status name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Affected => "affected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

/// Inventory action owed when an order settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compensation {
    /// Reserved stock is finalized.
    Confirm,
    /// Reserved stock is returned.
    Restore,
}

impl Compensation {
    /// Returns the compensation owed for entering `target`, if any.
    ///
    /// Only the first settlement counts, which the caller tracks; see
    /// [`Order::transition`](super::Order::transition).
    pub fn for_target(target: OrderStatus) -> Option<Self> {
        match target {
            OrderStatus::Completed => Some(Compensation::Confirm),
            OrderStatus::Cancelled => Some(Compensation::Restore),
            _ => None,
        }
    }

    /// Returns the compensation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compensation::Confirm => "confirm",
            Compensation::Restore => "restore",
        }
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
