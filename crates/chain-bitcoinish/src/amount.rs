//! Exact conversion between main-denomination decimal strings ("0.00005")
//! and integer base units (satoshis), backed by `rust_decimal`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::BitcoinishError;

/// Largest number of fractional digits a `Decimal` can carry.
pub const MAX_DECIMALS: u32 = 28;

/// Parse a non-negative decimal string into an integer number of base units.
///
/// `decimals` is the number of base-unit digits after the decimal point
/// (8 for BTC/LTC). More significant fractional digits than that are
/// rejected, never rounded.
pub fn to_base_units(amount: &str, decimals: u32) -> Result<u64, BitcoinishError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(BitcoinishError::InvalidAmount("empty amount".into()));
    }
    if decimals > MAX_DECIMALS {
        return Err(BitcoinishError::InvalidAmount(format!(
            "unsupported decimals {decimals}"
        )));
    }

    let value = Decimal::from_str_exact(amount)
        .map_err(|e| BitcoinishError::InvalidAmount(format!("'{amount}': {e}")))?
        .normalize();
    if value.is_sign_negative() {
        return Err(BitcoinishError::InvalidAmount(format!("'{amount}' is negative")));
    }
    if value.scale() > decimals {
        return Err(BitcoinishError::InvalidAmount(format!(
            "'{amount}' has more than {decimals} decimal places"
        )));
    }

    let scale = Decimal::from_i128_with_scale(10_i128.pow(decimals), 0);
    value
        .checked_mul(scale)
        .and_then(|units| units.to_u64())
        .ok_or_else(|| BitcoinishError::InvalidAmount(format!("'{amount}' overflows")))
}

/// Format an integer base-unit amount as a main-denomination decimal string,
/// without trailing zeros (`2940` with 8 decimals is `"0.0000294"`).
pub fn to_main_denomination(base_units: u64, decimals: u32) -> Result<String, BitcoinishError> {
    let mut value = Decimal::from(base_units);
    value
        .set_scale(decimals)
        .map_err(|_| BitcoinishError::InvalidAmount(format!("unsupported decimals {decimals}")))?;
    Ok(value.normalize().to_string())
}

/// Serde adapter that writes `u64` base-unit amounts as decimal strings and
/// accepts either strings or JSON integers when reading.
pub mod serde_string {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer amount in base units")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.parse::<u64>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
