//! Fee estimation: turns a fee-rate specification and an estimated
//! transaction size into an integer fee in base units.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::amount::to_base_units;
use crate::error::BitcoinishError;
use crate::network::NetworkProfile;
use crate::transaction::TxSize;

/// Fractional digits accepted when parsing a [`FeeRate`].
const RATE_DECIMALS: u32 = 3;

/// An exact fee rate in base units per size unit. Quotes like `2.5 sat/vB`
/// are held as decimals, never as floating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeeRate(Decimal);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(Decimal::ZERO);

    /// A whole number of base units per size unit.
    pub const fn from_base(units: u64) -> Self {
        Self(Decimal::from_parts(units as u32, (units >> 32) as u32, 0, false, 0))
    }

    /// Thousandths of a base unit per size unit.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Decimal::from_parts(
            millis as u32,
            (millis >> 32) as u32,
            0,
            false,
            RATE_DECIMALS,
        ))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Fee for `size` units at this rate, floored to a whole base unit.
    pub fn fee_for(&self, size: u64) -> u64 {
        self.0
            .checked_mul(Decimal::from(size))
            .and_then(|fee| fee.floor().to_u64())
            .unwrap_or(u64::MAX)
    }
}

impl FromStr for FeeRate {
    type Err = BitcoinishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let millis = to_base_units(s, RATE_DECIMALS)
            .map_err(|e| BitcoinishError::InvalidAmount(format!("fee rate: {e}")))?;
        Ok(Self(Self::from_millis(millis).0.normalize()))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// How the caller wants the fee computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeRateSpec {
    /// Base units per virtual byte (weight units / 4).
    PerWeight(FeeRate),
    /// Base units per serialized byte, witness data included at full cost.
    PerByte(FeeRate),
    /// A fixed total fee in main denomination, e.g. `"0.00005"`.
    FixedMain(String),
    /// A fixed total fee in base units.
    FixedBase(u64),
}

impl FeeRateSpec {
    /// Fixed fees do not depend on transaction size.
    pub fn is_fixed(&self) -> bool {
        matches!(self, FeeRateSpec::FixedMain(_) | FeeRateSpec::FixedBase(_))
    }
}

/// Result of [`estimate_fee`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub fee: u64,
    /// Set when the requested fee was under the network's minimum relay fee
    /// and has been raised to it.
    pub clamped: bool,
}

/// Compute the fee for a transaction of the given estimated size.
///
/// The result is always a whole number of base units. When the network
/// declares a minimum relay fee rate and the requested fee is below it, the
/// fee is raised to that floor and `clamped` is reported. Callers decide
/// whether to warn; this is never an error.
pub fn estimate_fee(
    spec: &FeeRateSpec,
    size: TxSize,
    profile: &NetworkProfile,
) -> Result<FeeEstimate, BitcoinishError> {
    let requested = match spec {
        FeeRateSpec::PerWeight(rate) => rate.fee_for(size.vbytes),
        FeeRateSpec::PerByte(rate) => rate.fee_for(size.bytes),
        FeeRateSpec::FixedMain(amount) => to_base_units(amount, profile.decimals)?,
        FeeRateSpec::FixedBase(amount) => *amount,
    };

    let floor = profile.min_relay_fee_rate.fee_for(size.vbytes);
    if requested < floor {
        debug!(
            network = profile.name,
            requested,
            floor,
            vbytes = size.vbytes,
            "fee below minimum relay fee, raising to floor"
        );
        return Ok(FeeEstimate {
            fee: floor,
            clamped: true,
        });
    }

    Ok(FeeEstimate {
        fee: requested,
        clamped: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{BITCOIN_MAINNET, LITECOIN_MAINNET};

    fn size(vbytes: u64, bytes: u64) -> TxSize {
        TxSize { vbytes, bytes }
    }

    #[test]
    fn per_weight_multiplies_virtual_size() {
        let spec = FeeRateSpec::PerWeight(FeeRate::from_base(21));
        let est = estimate_fee(&spec, size(140, 222), &LITECOIN_MAINNET).unwrap();
        assert_eq!(est.fee, 2_940);
        assert!(!est.clamped);
    }

    #[test]
    fn per_byte_multiplies_raw_size() {
        let spec = FeeRateSpec::PerByte(FeeRate::from_base(2));
        let est = estimate_fee(&spec, size(140, 222), &BITCOIN_MAINNET).unwrap();
        assert_eq!(est.fee, 444);
    }

    #[test]
    fn fractional_rate_is_floored() {
        let spec = FeeRateSpec::PerWeight("2.5".parse().unwrap());
        let est = estimate_fee(&spec, size(141, 141), &BITCOIN_MAINNET).unwrap();
        // 2.5 * 141 = 352.5
        assert_eq!(est.fee, 352);
    }

    #[test]
    fn fixed_main_is_converted_exactly() {
        let spec = FeeRateSpec::FixedMain("0.00005".into());
        let est = estimate_fee(&spec, size(112, 193), &LITECOIN_MAINNET).unwrap();
        assert_eq!(est.fee, 5_000);
    }

    #[test]
    fn fixed_base_ignores_size() {
        let spec = FeeRateSpec::FixedBase(10_000);
        assert_eq!(estimate_fee(&spec, size(1, 1), &BITCOIN_MAINNET).unwrap().fee, 10_000);
        assert_eq!(estimate_fee(&spec, size(900, 900), &BITCOIN_MAINNET).unwrap().fee, 10_000);
    }

    #[test]
    fn below_min_relay_fee_is_clamped() {
        let spec = FeeRateSpec::PerWeight("0.1".parse().unwrap());
        let est = estimate_fee(&spec, size(200, 300), &BITCOIN_MAINNET).unwrap();
        assert_eq!(est.fee, 200);
        assert!(est.clamped);
    }

    #[test]
    fn fixed_fee_below_floor_is_clamped_too() {
        let spec = FeeRateSpec::FixedBase(50);
        let est = estimate_fee(&spec, size(110, 110), &BITCOIN_MAINNET).unwrap();
        assert_eq!(est.fee, 110);
        assert!(est.clamped);
    }

    #[test]
    fn zero_floor_disables_clamping() {
        let profile = BITCOIN_MAINNET.with_min_relay_fee_rate(FeeRate::ZERO);
        let spec = FeeRateSpec::PerWeight(FeeRate::ZERO);
        let est = estimate_fee(&spec, size(200, 300), &profile).unwrap();
        assert_eq!(est.fee, 0);
        assert!(!est.clamped);
    }

    #[test]
    fn invalid_fixed_main_is_an_error() {
        let spec = FeeRateSpec::FixedMain("abc".into());
        assert!(estimate_fee(&spec, size(1, 1), &BITCOIN_MAINNET).is_err());
    }

    #[test]
    fn fee_rate_parse_and_display() {
        let rate: FeeRate = "21".parse().unwrap();
        assert_eq!(rate, FeeRate::from_base(21));
        assert_eq!(rate.to_string(), "21");
        assert_eq!("0.125".parse::<FeeRate>().unwrap(), FeeRate::from_millis(125));
        assert_eq!(FeeRate::from_millis(2_500).to_string(), "2.5");
        assert_eq!(FeeRate::from_millis(2_500).as_decimal(), Decimal::new(25, 1));
        assert!("0.0001".parse::<FeeRate>().is_err());
    }

    #[test]
    fn is_fixed() {
        assert!(FeeRateSpec::FixedBase(1).is_fixed());
        assert!(FeeRateSpec::FixedMain("1".into()).is_fixed());
        assert!(!FeeRateSpec::PerByte(FeeRate::ZERO).is_fixed());
    }
}
