//! Money & Version Types
//!
//! All balances and amounts are stored as non-negative `i64` in the wallet's
//! smallest unit (cents for monetary wallets, whole points otherwise).
//! Decimal arithmetic is only used for exchange conversion, and the result is
//! always brought back to an integer through banker's rounding.
//!
//! ## Exchange conversion
//! ```text
//! x       = amount / 100     if from wallet is monetary, else amount
//! x'      = x * rate
//! credited = round(x' * 100) if to wallet is monetary,   else round(x')
//! ```

use std::fmt;
use std::ops::Deref;

use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Cents per unit for monetary wallets.
pub const MONETARY_SCALE: i64 = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount cannot be negative: {0}")]
    Negative(i64),

    #[error("Amount would overflow")]
    Overflow,

    #[error("Amount would go below zero")]
    Underflow,

    #[error("Exchange rate must be positive")]
    InvalidRate,
}

// ============================================================================
// Amount
// ============================================================================

/// Non-negative integer amount in the wallet's smallest unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: i64) -> Result<Self, MoneyError> {
        if value < 0 {
            return Err(MoneyError::Negative(value));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, MoneyError> {
        if other.0 > self.0 {
            return Err(MoneyError::Underflow);
        }
        Ok(Amount(self.0 - other.0))
    }
}

impl Deref for Amount {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = MoneyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<u32> for Amount {
    fn from(value: u32) -> Self {
        Amount(value as i64)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Amount::new(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Version
// ============================================================================

/// Monotonic account row version. Starts at 0, +1 per committed mutation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const INITIAL: Version = Version(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Version(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Exchange conversion
// ============================================================================

/// Convert `amount` of the source wallet into the destination wallet's units.
///
/// Uses banker's rounding (midpoint to even) on the final step only.
pub fn convert_amount(
    amount: Amount,
    from_monetary: bool,
    to_monetary: bool,
    rate: Decimal,
) -> Result<Amount, MoneyError> {
    if rate <= Decimal::ZERO {
        return Err(MoneyError::InvalidRate);
    }

    let scale = Decimal::from(MONETARY_SCALE);
    let mut x = Decimal::from(amount.value());
    if from_monetary {
        x = x.checked_div(scale).ok_or(MoneyError::Overflow)?;
    }

    let mut converted = x.checked_mul(rate).ok_or(MoneyError::Overflow)?;
    if to_monetary {
        converted = converted.checked_mul(scale).ok_or(MoneyError::Overflow)?;
    }

    let rounded = converted.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    let value = rounded.to_i64().ok_or(MoneyError::Overflow)?;
    Amount::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_amount_rejects_negative() {
        assert_eq!(Amount::new(-1), Err(MoneyError::Negative(-1)));
        assert!(Amount::new(0).unwrap().is_zero());
    }

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::new(100).unwrap();
        let b = Amount::new(40).unwrap();
        assert_eq!(a.checked_sub(b).unwrap().value(), 60);
        assert_eq!(a.checked_add(b).unwrap().value(), 140);
        assert_eq!(b.checked_sub(a), Err(MoneyError::Underflow));
        assert_eq!(
            Amount::new(i64::MAX).unwrap().checked_add(b),
            Err(MoneyError::Overflow)
        );
        // Exactly the balance leaves zero
        assert!(a.checked_sub(a).unwrap().is_zero());
    }

    #[test]
    fn test_amount_deserialize_rejects_negative() {
        assert!(serde_json::from_str::<Amount>("-5").is_err());
        assert_eq!(serde_json::from_str::<Amount>("5").unwrap().value(), 5);
    }

    #[test]
    fn test_version_next() {
        assert_eq!(Version::INITIAL.next(), Version::new(1));
        assert_eq!(Version::new(41).next().value(), 42);
    }

    #[test]
    fn test_convert_monetary_to_points() {
        // 400 cents at 2.5 points per unit = 10 points
        let credited = convert_amount(Amount::new(400).unwrap(), true, false, dec("2.5")).unwrap();
        assert_eq!(credited.value(), 10);
    }

    #[test]
    fn test_convert_points_to_monetary() {
        // 10 points at 0.4 -> 4.0 units -> 400 cents
        let credited = convert_amount(Amount::new(10).unwrap(), false, true, dec("0.4")).unwrap();
        assert_eq!(credited.value(), 400);
    }

    #[test]
    fn test_convert_bankers_rounding() {
        // 5 * 0.5 = 2.5 -> 2 (even), 7 * 0.5 = 3.5 -> 4 (even)
        assert_eq!(
            convert_amount(Amount::new(5).unwrap(), false, false, dec("0.5"))
                .unwrap()
                .value(),
            2
        );
        assert_eq!(
            convert_amount(Amount::new(7).unwrap(), false, false, dec("0.5"))
                .unwrap()
                .value(),
            4
        );
    }

    #[test]
    fn test_convert_rounds_to_zero() {
        // 1 cent at 2.5 -> 0.025 points -> 0
        let credited = convert_amount(Amount::new(1).unwrap(), true, false, dec("2.5")).unwrap();
        assert!(credited.is_zero());
    }

    #[test]
    fn test_convert_rejects_non_positive_rate() {
        assert_eq!(
            convert_amount(Amount::new(1).unwrap(), false, false, Decimal::ZERO),
            Err(MoneyError::InvalidRate)
        );
    }
}
