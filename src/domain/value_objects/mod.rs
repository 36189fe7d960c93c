//! Value objects shared by the order and return aggregates

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Money value object. Amounts are decimal; order grand totals are rounded up
/// to whole currency units via [`Money::ceil`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
        }
    }

    pub fn inr(amount: Decimal) -> Self {
        Self::new(amount, "INR")
    }

    pub fn zero(currency: &str) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        Ok(Money::new(self.amount - other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money {
        Money::new(self.amount * Decimal::from(qty), &self.currency)
    }

    /// Percentage of this amount, used for line-item tax snapshots.
    pub fn percent(&self, rate: Decimal) -> Money {
        Money::new(self.amount * rate / Decimal::from(100u32), &self.currency)
    }

    /// Round up to the next whole currency unit.
    pub fn ceil(&self) -> Money {
        Money::new(self.amount.ceil(), &self.currency)
    }

    fn check_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch);
        }
        Ok(())
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero("INR")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[derive(Debug, Clone, Error)]
pub enum MoneyError {
    #[error("currency mismatch")]
    CurrencyMismatch,
}

/// Human-readable order reference: `ORD-<unix-millis>-<4 random digits>`.
pub fn new_order_reference() -> String {
    new_reference("ORD")
}

/// Human-readable return reference: `RET-<unix-millis>-<4 random digits>`.
pub fn new_return_reference() -> String {
    new_reference("RET")
}

fn new_reference(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{}-{}-{:04}", prefix, Utc::now().timestamp_millis(), suffix)
}
