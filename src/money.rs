//! Fixed-point monetary amounts and conversion rates.
//!
//! Both types wrap `rust_decimal::Decimal` with scale enforcement so sums and
//! currency conversions never pick up floating-point noise from spreadsheet
//! cells. A value that cannot be held at the type's scale is rejected at
//! construction, and arithmetic is checked, so every `Amount` and `Rate` in
//! flight can always be formatted.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A monetary amount with exactly 4 decimal places.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use po_report_engine::Amount;
///
/// let amount = Amount::from_str("1,250.5").unwrap();
/// assert_eq!(amount.to_string(), "1250.5000");
/// assert!(Amount::from_f64(1e27).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    /// The number of decimal places to maintain.
    pub const SCALE: u32 = 4;

    /// Zero value.
    pub const ZERO: Self = Amount(Decimal::ZERO);

    /// Normalizes to 4 decimal places. Returns `None` when the magnitude is
    /// too large to carry 4 decimal places.
    pub fn new(value: Decimal) -> Option<Self> {
        rescaled(value, Self::SCALE).map(Amount)
    }

    /// Converts a numeric spreadsheet cell. Returns `None` for NaN, infinity
    /// or out-of-range values.
    pub fn from_f64(value: f64) -> Option<Self> {
        Decimal::try_from(value).ok().and_then(Amount::new)
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).and_then(Amount::new)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).and_then(Amount::new)
    }

    /// Converts at `rate`.
    pub fn checked_mul(self, rate: Rate) -> Option<Amount> {
        self.0.checked_mul(rate.0).and_then(Amount::new)
    }

    /// `self / denominator` as a rate, or `None` when the denominator is zero
    /// or the quotient does not fit a rate.
    pub fn ratio(self, denominator: Amount) -> Option<Rate> {
        if denominator.is_zero() {
            return None;
        }
        self.0.checked_div(denominator.0).and_then(Rate::new)
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_decimal(s).and_then(|value| Amount::new(value).ok_or_else(|| out_of_range(value)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A currency conversion rate with exactly 6 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(Decimal);

impl Rate {
    /// The number of decimal places to maintain.
    pub const SCALE: u32 = 6;

    /// Identity rate, used when no conversion information exists.
    pub const ONE: Self = Rate(Decimal::ONE);

    /// Normalizes to 6 decimal places. Returns `None` when the magnitude is
    /// too large to carry 6 decimal places.
    pub fn new(value: Decimal) -> Option<Self> {
        rescaled(value, Self::SCALE).map(Rate)
    }

    /// Converts a numeric spreadsheet cell. Returns `None` for NaN, infinity
    /// or out-of-range values.
    pub fn from_f64(value: f64) -> Option<Self> {
        Decimal::try_from(value).ok().and_then(Rate::new)
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::ONE
    }
}

impl FromStr for Rate {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_decimal(s).and_then(|value| Rate::new(value).ok_or_else(|| out_of_range(value)))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

impl Serialize for Rate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Rate::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Parses text the way report cells write numbers: surrounding whitespace and
/// thousands separators are ignored.
pub(crate) fn parse_decimal(s: &str) -> std::result::Result<Decimal, rust_decimal::Error> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    Decimal::from_str(&cleaned)
}

/// `value` at exactly `scale` decimal places, if it fits in 96 bits.
fn rescaled(value: Decimal, scale: u32) -> Option<Decimal> {
    let mut normalized = value;
    normalized.rescale(scale);
    (normalized.scale() == scale).then_some(normalized)
}

fn out_of_range(value: Decimal) -> rust_decimal::Error {
    if value.is_sign_negative() {
        rust_decimal::Error::LessThanMinimumPossibleValue
    } else {
        rust_decimal::Error::ExceedsMaximumPossibleValue
    }
}
