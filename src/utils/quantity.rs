//! JSON-RPC quantity codec.
//!
//! Nodes encode numbers as `0x`-prefixed hex strings. Values without the
//! prefix are read as decimal so that hosts and tests can feed plain numbers.

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed quantity: {0:?}")]
pub struct QuantityError(pub String);

/// Parses a hex (`0x...`) or decimal quantity into an arbitrary-precision integer.
pub fn parse_quantity(raw: &str) -> Result<BigUint, QuantityError> {
    let trimmed = raw.trim();
    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };

    // `parse_bytes` accepts `_` separators, which no node ever sends.
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(QuantityError(raw.to_string()));
    }

    BigUint::parse_bytes(digits.as_bytes(), radix).ok_or_else(|| QuantityError(raw.to_string()))
}

/// Formats a value as a minimal `0x` hex quantity.
pub fn format_quantity(value: &BigUint) -> String {
    format!("0x{:x}", value)
}
