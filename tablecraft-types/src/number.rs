//! Arbitrary-precision numbers.
//!
//! Store numbers are decimal text on the wire. [`Number`] keeps them as a
//! [`BigDecimal`] so integers of any width and decimal fractions survive a
//! write/read cycle exactly.

use crate::{ValueError, ValueResult};
use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An exact decimal number.
///
/// Equality is numeric: `1.5` and `1.50` compare equal and render the same.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Number(BigDecimal);

impl Number {
    /// Parses a decimal literal such as `"12"`, `"-0.125"` or `"1e3"`.
    pub fn parse(s: &str) -> ValueResult<Self> {
        BigDecimal::from_str(s.trim())
            .map(Self)
            .map_err(|_| ValueError::InvalidNumber(s.to_string()))
    }

    /// Converts a float through its shortest round-trip decimal form, so
    /// `0.1` becomes exactly `0.1` rather than its binary expansion.
    pub fn from_f64(value: f64) -> ValueResult<Self> {
        if !value.is_finite() {
            return Err(ValueError::NonFinite(value));
        }
        Self::parse(&value.to_string())
    }

    /// Returns the underlying decimal.
    #[must_use]
    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    /// Consumes the number, returning the underlying decimal.
    #[must_use]
    pub fn into_decimal(self) -> BigDecimal {
        self.0
    }

    /// True when the value has no fractional part.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    /// Number of digits after the decimal point once trailing zeros are dropped.
    #[must_use]
    pub fn fractional_digits(&self) -> i64 {
        self.0.normalized().as_bigint_and_exponent().1.max(0)
    }

    /// Exact conversion to `i64`; `None` if fractional or out of range.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        if self.is_integer() { self.0.to_i64() } else { None }
    }

    /// Exact conversion to `u64`; `None` if fractional, negative or out of range.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.is_integer() { self.0.to_u64() } else { None }
    }

    /// Nearest `f64`. Use [`Number::to_f64_exact`] when loss must be detected.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        self.to_plain_string().parse::<f64>().ok().filter(|f| f.is_finite())
    }

    /// `f64` conversion that succeeds only when the float's shortest form is
    /// numerically equal to this value.
    #[must_use]
    pub fn to_f64_exact(&self) -> Option<f64> {
        let f = self.to_f64()?;
        let back = Self::from_f64(f).ok()?;
        (back == *self).then_some(f)
    }

    /// Plain (non-scientific) decimal text with trailing zeros removed.
    #[must_use]
    pub fn to_plain_string(&self) -> String {
        self.0.normalized().to_plain_string()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_string())
    }
}

impl FromStr for Number {
    type Err = ValueError;

    fn from_str(s: &str) -> ValueResult<Self> {
        Self::parse(s)
    }
}

impl From<BigDecimal> for Number {
    fn from(value: BigDecimal) -> Self {
        Self(value)
    }
}

macro_rules! number_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Number {
            fn from(value: $t) -> Self {
                Self(BigDecimal::from(value))
            }
        })*
    };
}

number_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl TryFrom<f64> for Number {
    type Error = ValueError;

    fn try_from(value: f64) -> ValueResult<Self> {
        Self::from_f64(value)
    }
}

// Goes through serde_json::Number so that, with arbitrary precision enabled,
// the exact literal reaches the serializer instead of an f64.
impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let literal: serde_json::Number =
            serde_json::from_str(&self.to_plain_string()).map_err(serde::ser::Error::custom)?;
        literal.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let literal = serde_json::Number::deserialize(deserializer)?;
        Self::parse(&literal.to_string()).map_err(serde::de::Error::custom)
    }
}
