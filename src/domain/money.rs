//! Money type
//!
//! Domain primitive for prices and order totals.
//! Values are validated at construction time, so a `Money` held anywhere in
//! the system is non-negative and has at most two decimal places.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum representable amount (1 trillion)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Maximum decimal places (cents)
const MAX_SCALE: u32 = 2;

/// Money represents a validated, non-negative monetary value.
///
/// # Invariants
/// - Value is zero or positive
/// - At most 2 significant decimal places
/// - Maximum value is 1 trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use order_events::domain::Money;
///
/// let price = Money::new(Decimal::new(1000, 2)).unwrap();
/// assert_eq!(price.to_string(), "10.00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(Decimal);

/// Errors that can occur when creating a Money value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Money must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Money has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Money exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid money format: {0}")]
    ParseError(String),
}

impl Money {
    /// Create a new Money value with validation.
    ///
    /// # Errors
    /// - `MoneyError::Negative` if value < 0
    /// - `MoneyError::TooManyDecimals` if more than 2 significant decimal places
    /// - `MoneyError::Overflow` if value > 1 trillion
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative(value));
        }

        let normalized = value.normalize();
        if normalized.scale() > MAX_SCALE {
            return Err(MoneyError::TooManyDecimals(normalized.scale()));
        }

        if value > MAX_AMOUNT {
            return Err(MoneyError::Overflow);
        }

        let mut cents = normalized;
        cents.rescale(MAX_SCALE);
        Ok(Self(cents))
    }

    /// Zero money
    pub fn zero() -> Self {
        Self(Decimal::new(0, MAX_SCALE))
    }

    /// Create from an integer number of cents.
    pub fn from_cents(cents: i64) -> Result<Self, MoneyError> {
        Self::new(Decimal::new(cents, MAX_SCALE))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        Money::new(self.0 + other.0)
    }

    /// Subtract, failing if the result would be negative.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        Money::new(self.0 - other.0)
    }

    /// Multiply by a line quantity.
    pub fn times(&self, quantity: u32) -> Result<Money, MoneyError> {
        Money::new(self.0 * Decimal::from(quantity))
    }

    /// Take `percent` percent of this value, rounded half away from zero to cents.
    pub fn percentage(&self, percent: Decimal) -> Result<Money, MoneyError> {
        let raw = self.0 * percent / Decimal::ONE_HUNDRED;
        Money::new(raw.round_dp_with_strategy(MAX_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Money::new(decimal)
    }
}

impl TryFrom<String> for Money {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Money::from_str(&value)
    }
}

impl From<Money> for String {
    fn from(money: Money) -> Self {
        money.to_string()
    }
}
