//! Lossless decimal numeric type backed by rust_decimal.
//!
//! All money, prices, and quantities in the engine go through this wrapper
//! so that balances never touch floating point.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for balances, prices, and PnL.
///
/// Serializes to a JSON number (not a string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation,
    /// no trailing zeros). This is the form stored in SQLite.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// Construct from an integer (leverage divisors, seed defaults).
    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns the value 100, for percentage math.
    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// The larger of self and other.
    pub fn max(self, other: Decimal) -> Decimal {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Clamp negative values to zero. Liquidation prices and bankrupt
    /// balances are floored here.
    pub fn clamp_non_negative(self) -> Decimal {
        self.max(Decimal::zero())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_roundtrip() {
        for s in ["123.456", "0.0001", "1000000", "-22", "0", "90"] {
            let d = Decimal::from_str_canonical(s).expect("parse failed");
            let reparsed = Decimal::from_str_canonical(&d.to_canonical_string()).unwrap();
            assert_eq!(d, reparsed, "roundtrip failed for {}", s);
        }
    }

    #[test]
    fn test_canonical_string_normalizes_trailing_zeros() {
        let d = Decimal::from_str_canonical("90.00").unwrap();
        assert_eq!(d.to_canonical_string(), "90");
    }

    #[test]
    fn test_arithmetic() {
        let entry = Decimal::from_str_canonical("100").unwrap();
        let exit = Decimal::from_str_canonical("89").unwrap();
        let qty = Decimal::from_str_canonical("2").unwrap();
        assert_eq!(((exit - entry) * qty).to_canonical_string(), "-22");
    }

    #[test]
    fn test_add_assign_and_sum() {
        let mut total = Decimal::zero();
        total += Decimal::from_i64(5);
        total += Decimal::from_i64(-8);
        assert_eq!(total.to_canonical_string(), "-3");

        let summed: Decimal = [Decimal::from_i64(1), Decimal::from_i64(2)]
            .into_iter()
            .sum();
        assert_eq!(summed, Decimal::from_i64(3));
    }

    #[test]
    fn test_clamp_non_negative() {
        assert_eq!(Decimal::from_i64(-3).clamp_non_negative(), Decimal::zero());
        assert_eq!(
            Decimal::from_i64(7).clamp_non_negative(),
            Decimal::from_i64(7)
        );
    }

    #[test]
    fn test_json_serializes_as_number() {
        let d = Decimal::from_str_canonical("123.456").unwrap();
        let json = serde_json::to_value(d).unwrap();
        assert!(json.is_number());
        assert_eq!(json.to_string(), "123.456");
    }

    #[test]
    fn test_ordering_and_max() {
        let a = Decimal::from_i64(10);
        let b = Decimal::from_i64(20);
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }
}
