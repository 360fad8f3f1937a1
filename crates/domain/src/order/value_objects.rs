//! Value objects for the order domain.

use common::ProductId;
use serde::{Deserialize, Serialize};

use super::OrderError;

/// Money amount represented in cents to avoid floating point issues.
///
/// On the wire amounts are plain decimal numbers (`999.99`), the way the
/// products service reports prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a Money amount from a decimal value, rounding to the nearest cent.
    pub fn from_decimal(amount: f64) -> Result<Self, OrderError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(OrderError::InvalidAmount(amount.to_string()));
        }
        Ok(Self {
            cents: (amount * 100.0).round() as i64,
        })
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns the amount as a decimal number.
    pub fn as_decimal(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl From<Money> for f64 {
    fn from(money: Money) -> Self {
        money.as_decimal()
    }
}

impl TryFrom<f64> for Money {
    type Error = OrderError;

    fn try_from(amount: f64) -> Result<Self, Self::Error> {
        Self::from_decimal(amount)
    }
}

/// A line of an order.
///
/// `name` and `price` are a snapshot taken when the order was created and are
/// never refreshed, so later product edits or deletions do not rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Product name at order time.
    pub name: String,

    /// Unit price at order time.
    pub price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(product_id: ProductId, quantity: u32, name: impl Into<String>, price: Money) -> Self {
        Self {
            product_id,
            quantity,
            name: name.into(),
            price,
        }
    }

    /// Returns the total price for this item (quantity * price).
    pub fn total_price(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}
