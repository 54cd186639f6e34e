//! Human-readable order numbers.
//!
//! Format: `<PREFIX>-<base36 millis>-<base36 random>`, all upper case, for
//! example `KBB-MC2Z1K8Q-4F7XQ2`. Uniqueness is ultimately enforced by the
//! database; the random suffix only keeps collisions rare.

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    #[error("order number cannot be empty")]
    Empty,
    #[error("order number must look like PREFIX-TIMESTAMP-SUFFIX")]
    Malformed,
    #[error("order number may only contain A-Z, 0-9 and dashes")]
    InvalidCharacter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Length of the random suffix.
    pub const SUFFIX_LEN: usize = 6;

    /// Generate a fresh order number from the current time.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        let entropy = rand::rng().random_range(0..36u64.pow(6));
        Self::generate_at(prefix, millis, entropy)
    }

    /// Deterministic constructor used by [`generate`](Self::generate).
    #[must_use]
    pub fn generate_at(prefix: &str, millis: u64, entropy: u64) -> Self {
        let mut suffix = to_base36(entropy % 36u64.pow(6));
        while suffix.len() < Self::SUFFIX_LEN {
            suffix.insert(0, '0');
        }
        Self(format!(
            "{}-{}-{suffix}",
            normalize_prefix(prefix),
            to_base36(millis)
        ))
    }

    /// Parse and normalize (upper-case) an order number taken from a URL.
    ///
    /// # Errors
    ///
    /// Returns an [`OrderNumberError`] if the value is not shaped like a
    /// generated order number.
    pub fn parse(s: &str) -> Result<Self, OrderNumberError> {
        let s = s.trim().to_ascii_uppercase();
        if s.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(OrderNumberError::InvalidCharacter);
        }
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(OrderNumberError::Malformed);
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        "KBB".to_owned()
    } else {
        cleaned
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = usize::try_from(value % 36).unwrap_or_default();
        digits.push(char::from(BASE36.get(digit).copied().unwrap_or(b'0')));
        value /= 36;
    }
    digits.iter().rev().collect()
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = OrderNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderNumber {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderNumber {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderNumber {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_at_is_deterministic() {
        let a = OrderNumber::generate_at("KBB", 1_700_000_000_000, 42);
        let b = OrderNumber::generate_at("KBB", 1_700_000_000_000, 42);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "KBB-LOYW3V28-000016");
    }

    #[test]
    fn test_prefix_is_normalized() {
        let number = OrderNumber::generate_at("kb-b", 35, 35);
        assert_eq!(number.as_str(), "KBB-Z-00000Z");
        assert_eq!(OrderNumber::generate_at("", 0, 0).as_str(), "KBB-0-000000");
    }

    #[test]
    fn test_generated_numbers_parse() {
        let number = OrderNumber::generate("KBB");
        let parsed = OrderNumber::parse(number.as_str()).unwrap();
        assert_eq!(parsed, number);
        assert!(number.as_str().starts_with("KBB-"));
    }

    #[test]
    fn test_generate_is_unlikely_to_collide() {
        let numbers: HashSet<_> = (0..500).map(|_| OrderNumber::generate("KBB")).collect();
        assert_eq!(numbers.len(), 500);
    }

    #[test]
    fn test_parse_normalizes_case() {
        assert_eq!(
            OrderNumber::parse(" kbb-abc-123xyz ").unwrap().as_str(),
            "KBB-ABC-123XYZ"
        );
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(OrderNumber::parse(""), Err(OrderNumberError::Empty));
        assert_eq!(OrderNumber::parse("KBB-1"), Err(OrderNumberError::Malformed));
        assert_eq!(
            OrderNumber::parse("KBB--123"),
            Err(OrderNumberError::Malformed)
        );
        assert_eq!(
            OrderNumber::parse("KBB-1-2;drop"),
            Err(OrderNumberError::InvalidCharacter)
        );
    }
}
