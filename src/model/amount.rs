//! Money values read from Shopify JSON and from sheet cells.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// A dollar amount. Parsing accepts an optional `$`, thousands separators and surrounding
/// whitespace. Display is always `$1,234.56` (`-$1,234.56` when negative).
///
/// ```
/// # use shop_sheets_sync::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("-$5,000.5").unwrap();
/// assert_eq!(amount.to_string(), "-$5,000.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Rounds to cents.
    pub fn round(&self) -> Self {
        Self(self.0.round_dp(2))
    }

    /// Parses a cell value the way a spreadsheet user would read it. Anything that is not a
    /// number (blank cells, `N/A`, text) reads as zero.
    pub fn from_cell(s: &str) -> Self {
        Amount::from_str(s).unwrap_or_default()
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }
}

/// The `rust_decimal` parse error, surfaced when a value is not a number.
#[derive(Debug)]
pub struct AmountError(rust_decimal::Error);

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AmountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Amount::default());
        }
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        let digits: String = unsigned
            .strip_prefix('$')
            .unwrap_or(unsigned)
            .chars()
            .filter(|c| *c != ',')
            .collect();
        let value = Decimal::from_str(&digits).map_err(AmountError)?;
        Ok(Amount(if negative { -value } else { value }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let abs = self.0.abs().round_dp(2);
        write!(
            f,
            "{sign}${}",
            format_num::format_num!(",.2", abs.to_f64().unwrap_or_default())
        )
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Amount {
    type Output = Amount;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Amount(self.0 * rhs)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(Amount::from_str("$50.00").unwrap().value(), d("50.00"));
        assert_eq!(Amount::from_str("50").unwrap().value(), d("50"));
        assert_eq!(Amount::from_str("-$50.00").unwrap().value(), d("-50.00"));
        assert_eq!(Amount::from_str("  $1,234,567.89 ").unwrap().value(), d("1234567.89"));
        assert_eq!(Amount::from_str("").unwrap(), Amount::ZERO);
        assert!(Amount::from_str("abc").is_err());
    }

    #[test]
    fn test_from_cell_is_lenient() {
        assert_eq!(Amount::from_cell("N/A"), Amount::ZERO);
        assert_eq!(Amount::from_cell("$4.85").value(), d("4.85"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::new(d("50")).to_string(), "$50.00");
        assert_eq!(Amount::new(d("-60000")).to_string(), "-$60,000.00");
        assert_eq!(Amount::new(d("1234.567")).to_string(), "$1,234.57");
        assert_eq!(Amount::ZERO.to_string(), "$0.00");
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&Amount::new(d("12.26"))).unwrap();
        assert_eq!(json, "\"$12.26\"");
        let amount: Amount = serde_json::from_str("\"-$50.00\"").unwrap();
        assert_eq!(amount.value(), d("-50.00"));
    }

    #[test]
    fn test_arithmetic() {
        let total: Amount = ["1.10", "2.20", "$3.30"]
            .iter()
            .map(|s| Amount::from_cell(s))
            .sum();
        assert_eq!(total.value(), d("6.60"));
        assert_eq!((total - Amount::new(d("7"))).to_string(), "-$0.40");
        assert_eq!((Amount::new(d("12.26")) * Decimal::from(3)).value(), d("36.78"));
    }

    #[test]
    fn test_zero_is_not_negative() {
        assert!(!Amount::from_cell("-0").is_negative());
        assert!(Amount::from_cell("-0.01").is_negative());
    }
}
