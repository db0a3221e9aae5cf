//! Value types shared by both transaction kinds.
//!
//! Monetary values are [`Amount`]s: arbitrary-precision unsigned integers in
//! scaled fixed-point units (18 decimals for purchase amounts). There is
//! exactly one accepted text form, the canonical decimal string, and
//! everything else is rejected with a [`ParseError`] instead of being coerced.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::SCHEMA_VERSION;
use crate::crypto::codec::{CanonicalEncode, CanonicalEncoder};

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

/// Rejection reasons for numeric input at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty numeric value")]
    Empty,

    #[error("invalid character in numeric value {0:?}")]
    InvalidDigit(String),

    #[error("non-canonical numeric value {0:?}: leading zeros are not allowed")]
    LeadingZero(String),

    #[error("negative value {0:?} is not allowed")]
    Negative(String),

    #[error("value {value:?} has more than {decimals} decimal places")]
    TooManyDecimals { value: String, decimals: u32 },

    #[error("value {0:?} does not fit in 64 bits")]
    Overflow(String),
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// Non-negative arbitrary-precision integer amount.
///
/// JSON form is a canonical decimal string (`"1500000000000000000"`). On
/// input a plain JSON unsigned integer is accepted too.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: impl Into<BigUint>) -> Self {
        Self(value.into())
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a canonical integer string: ASCII digits only, no sign, no
    /// whitespace, no leading zeros (except `"0"` itself).
    pub fn parse_canonical(text: &str) -> Result<Self, ParseError> {
        validate_integer_digits(text)?;
        if text.len() > 1 && text.starts_with('0') {
            return Err(ParseError::LeadingZero(text.to_string()));
        }
        BigUint::parse_bytes(text.as_bytes(), 10)
            .map(Self)
            .ok_or_else(|| ParseError::InvalidDigit(text.to_string()))
    }

    /// Scale a human decimal (`"12.5"`) into integer units with `decimals`
    /// fractional digits. More fractional digits than `decimals` is an error.
    pub fn from_decimal(text: &str, decimals: u32) -> Result<Self, ParseError> {
        scale_decimal(text, decimals, false)
    }

    /// Like [`from_decimal`](Self::from_decimal) but drops excess fractional
    /// digits (rounds toward zero).
    pub fn from_decimal_truncated(text: &str, decimals: u32) -> Result<Self, ParseError> {
        scale_decimal(text, decimals, true)
    }

    /// Narrow to `u32`, as needed for `providePercent`.
    pub fn to_u32(&self) -> Result<u32, ParseError> {
        let digits = self.0.to_u32_digits();
        match digits.as_slice() {
            [] => Ok(0),
            [v] => Ok(*v),
            _ => Err(ParseError::Overflow(self.0.to_string())),
        }
    }
}

/// Parse a sequence number or timestamp received as text. Surrounding
/// whitespace is ignored; anything but ASCII digits is rejected.
pub fn parse_u64(text: &str) -> Result<u64, ParseError> {
    let text = text.trim();
    validate_integer_digits(text)?;
    text.parse()
        .map_err(|_| ParseError::Overflow(text.to_string()))
}

fn validate_integer_digits(text: &str) -> Result<(), ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    if text.starts_with('-') {
        return Err(ParseError::Negative(text.to_string()));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidDigit(text.to_string()));
    }
    Ok(())
}

fn scale_decimal(text: &str, decimals: u32, truncate: bool) -> Result<Amount, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    if text.starts_with('-') {
        return Err(ParseError::Negative(text.to_string()));
    }
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    validate_integer_digits(int_part)?;
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidDigit(text.to_string()));
    }

    let width = decimals as usize;
    let frac = if frac_part.len() > width {
        if !truncate {
            return Err(ParseError::TooManyDecimals {
                value: text.to_string(),
                decimals,
            });
        }
        &frac_part[..width]
    } else {
        frac_part
    };

    let mut digits = String::with_capacity(int_part.len() + width);
    digits.push_str(int_part);
    digits.push_str(frac);
    digits.extend(std::iter::repeat('0').take(width - frac.len()));

    BigUint::parse_bytes(digits.as_bytes(), 10)
        .map(Amount)
        .ok_or_else(|| ParseError::InvalidDigit(text.to_string()))
}

impl FromStr for Amount {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_canonical(s)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct AmountVisitor;

impl<'de> de::Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a canonical decimal string or an unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Amount::parse_canonical(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        u64::try_from(v)
            .map(Amount::from)
            .map_err(|_| E::custom(ParseError::Negative(v.to_string())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        Err(E::custom(ParseError::InvalidDigit(v.to_string())))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Binary formats cannot self-describe, so they always carry the string.
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(AmountVisitor)
        } else {
            deserializer.deserialize_str(AmountVisitor)
        }
    }
}

impl CanonicalEncode for Amount {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.biguint(&self.0);
    }
}

// ---------------------------------------------------------------------------
// PurchaseDetails
// ---------------------------------------------------------------------------

/// One line item of a purchase. List order is significant for hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDetails {
    pub product_id: String,
    pub amount: Amount,
    /// Percent × 100 (`1234` means 12.34%).
    pub provide_percent: u32,
}

impl PurchaseDetails {
    pub fn new(product_id: impl Into<String>, amount: Amount, provide_percent: u32) -> Self {
        Self {
            product_id: product_id.into(),
            amount,
            provide_percent,
        }
    }
}

impl CanonicalEncode for PurchaseDetails {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.str(&self.product_id)
            .value(&self.amount)
            .u32(self.provide_percent);
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Rejects transactions written under a schema this build cannot hash.
pub(crate) mod schema_version {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(*v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let v = u16::deserialize(deserializer)?;
        if v != SCHEMA_VERSION {
            return Err(de::Error::custom(format!(
                "unsupported transaction schema version {v}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(v)
    }
}

/// `Option<T>` whose `None` is the empty string on the wire.
pub(crate) mod empty_as_none {
    use super::*;

    pub fn serialize<T, S>(v: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: fmt::Display,
        S: Serializer,
    {
        match v {
            Some(inner) => serializer.serialize_str(&inner.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: fmt::Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(None);
        }
        s.parse().map(Some).map_err(de::Error::custom)
    }
}
