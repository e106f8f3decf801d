use chain_bitcoinish::address::AddressType;
use chain_bitcoinish::bip44::default_derivation_path;
use chain_bitcoinish::fee::FeeRate;
use chain_bitcoinish::network::NetworkProfile;
use serde::{Deserialize, Serialize};

use crate::error::PaymentsError;
use crate::types::{Coin, FeeLevel, NetworkType};

fn default_address_type() -> AddressType {
    AddressType::SegwitNative
}

/// Configuration of an HD payments instance.
///
/// Only `hd_key` is required; it may be a root key or a key already derived
/// to (a prefix of) the derivation path, private or public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdPaymentsConfig {
    #[serde(default)]
    pub coin: Coin,
    #[serde(default)]
    pub network: NetworkType,
    pub hd_key: String,
    #[serde(default = "default_address_type")]
    pub address_type: AddressType,
    /// Account path; defaults to `m/purpose'/coin_type'/0'`.
    #[serde(default)]
    pub derivation_path: Option<String>,
    /// Used when a transaction is created without a fee option.
    #[serde(default)]
    pub fee_level: FeeLevel,
    #[serde(default)]
    pub dust_threshold: Option<u64>,
    /// Base units per virtual byte, e.g. `"1"` or `"0.5"`.
    #[serde(default)]
    pub min_relay_fee_rate: Option<String>,
    #[serde(default)]
    pub target_utxo_pool_size: Option<usize>,
}

impl HdPaymentsConfig {
    pub fn new(coin: Coin, network: NetworkType, hd_key: impl Into<String>) -> Self {
        Self {
            coin,
            network,
            hd_key: hd_key.into(),
            address_type: default_address_type(),
            derivation_path: None,
            fee_level: FeeLevel::default(),
            dust_threshold: None,
            min_relay_fee_rate: None,
            target_utxo_pool_size: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, PaymentsError> {
        serde_json::from_str(json).map_err(|e| PaymentsError::Config(e.to_string()))
    }

    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = address_type;
        self
    }

    pub fn with_target_utxo_pool_size(mut self, size: usize) -> Self {
        self.target_utxo_pool_size = Some(size);
        self
    }

    /// The coin's built-in profile with this config's overrides applied.
    pub fn network_profile(&self) -> Result<NetworkProfile, PaymentsError> {
        let mut profile = self.coin.profile(self.network);
        if let Some(dust) = self.dust_threshold {
            profile = profile.with_dust_threshold(dust);
        }
        if let Some(rate) = &self.min_relay_fee_rate {
            let rate: FeeRate = rate
                .parse()
                .map_err(|e| PaymentsError::Config(format!("min_relay_fee_rate: {e}")))?;
            profile = profile.with_min_relay_fee_rate(rate);
        }
        Ok(profile)
    }

    pub fn account_path(&self, profile: &NetworkProfile) -> String {
        self.derivation_path
            .clone()
            .unwrap_or_else(|| default_derivation_path(self.address_type, profile))
    }
}
