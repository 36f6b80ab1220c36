//! Human-readable currency amount parsing.
//!
//! This module provides [`MoneyAmount`], the decimal amount type used on the
//! wire (`max_amount_required`, `actual_amount`) and for converting between
//! human-denominated values and on-chain token units.
//!
//! # Supported Formats
//!
//! - Plain numbers: `"100"`, `"0.01"`
//! - With currency symbols: `"$10.50"`
//! - With thousand separators: `"1,000"`, `"1,000,000.50"`

use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A parsed monetary amount with decimal precision.
///
/// This type represents a non-negative decimal value parsed from a
/// human-readable string. It preserves the original precision, which
/// matters when converting to token amounts with specific decimal places.
///
/// Serialized as a decimal string (e.g. `"0.10"`), matching the payment
/// request and authorization wire formats.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// The zero amount.
    pub const ZERO: MoneyAmount = MoneyAmount(Decimal::ZERO);

    /// Returns the number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Returns the value as an unsigned integer (without decimal point).
    ///
    /// For example, `"12.34"` returns `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Returns the inner decimal value.
    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Converts to on-chain token units given the token's decimal places.
    ///
    /// `"0.10"` with 6 decimals becomes `100_000`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyAmountParseError::WrongPrecision`] if the input has
    /// more decimal places than the token supports, and
    /// [`MoneyAmountParseError::OutOfRange`] if the unit count overflows.
    pub fn as_token_units(&self, decimals: u32) -> Result<u64, MoneyAmountParseError> {
        let scale = self.0.scale();
        if scale > decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let factor = 10u128
            .checked_pow(decimals - scale)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let units = self
            .mantissa()
            .checked_mul(factor)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        u64::try_from(units).map_err(|_| MoneyAmountParseError::OutOfRange)
    }

    /// Builds an amount from raw token units and the token's decimal places.
    ///
    /// `100_000` units with 6 decimals becomes `"0.1"`.
    pub fn from_token_units(units: u64, decimals: u32) -> Self {
        MoneyAmount(Decimal::from_i128_with_scale(units as i128, decimals))
    }
}

/// Errors that can occur when parsing a monetary amount.
#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    /// The input string could not be parsed as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// The value is outside the allowed range.
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    /// Negative values are not allowed.
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more decimal places than the token supports.
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision {
        /// Decimal places in the input.
        money: u32,
        /// Decimal places supported by the token.
        token: u32,
    },
}

mod constants {
    use super::*;
    use std::sync::LazyLock;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    /// Parses a human-readable currency string into a [`MoneyAmount`].
    ///
    /// Currency symbols, thousand separators, and whitespace are stripped
    /// before parsing. The result must be a non-negative number within
    /// the allowed range.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The string cannot be parsed as a number
    /// - The value is negative
    /// - The value is outside the allowed range
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        // Remove anything that isn't digit, dot, minus
        let cleaned = Regex::new(r"[^\d\.\-]+")
            .unwrap()
            .replace_all(input, "")
            .to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl From<u64> for MoneyAmount {
    fn from(value: u64) -> Self {
        MoneyAmount(Decimal::from(value))
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        if decimal.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if decimal < *constants::MIN || decimal > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(decimal))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.normalize().to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_decorated_amounts() {
        assert_eq!(MoneyAmount::parse("0.10").unwrap().to_string(), "0.1");
        assert_eq!(MoneyAmount::parse("$10.50").unwrap().mantissa(), 1050);
        assert_eq!(MoneyAmount::parse("1,000").unwrap().mantissa(), 1000);
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(matches!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        ));
        assert!(matches!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        ));
    }

    #[test]
    fn token_unit_round_trip() {
        let amount = MoneyAmount::parse("0.10").unwrap();
        assert_eq!(amount.as_token_units(6).unwrap(), 100_000);
        assert_eq!(
            MoneyAmount::from_token_units(100_000, 6),
            MoneyAmount::parse("0.1").unwrap()
        );
    }

    #[test]
    fn token_units_reject_excess_precision() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert!(matches!(
            amount.as_token_units(6),
            Err(MoneyAmountParseError::WrongPrecision { money: 7, token: 6 })
        ));
    }

    #[test]
    fn serde_as_decimal_string() {
        let amount = MoneyAmount::parse("0.10").unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"0.1\"");
        let back: MoneyAmount = serde_json::from_str("\"0.10\"").unwrap();
        assert_eq!(back, amount);
    }
}
