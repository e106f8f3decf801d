use std::fmt;

use chain_bitcoinish::amount::serde_string;
use chain_bitcoinish::network::{
    NetworkProfile, BITCOIN_MAINNET, BITCOIN_TESTNET, LITECOIN_MAINNET, LITECOIN_TESTNET,
};
use chain_bitcoinish::transaction::{PaymentTx, TxOutput};
use chain_bitcoinish::utxo::UtxoInfo;
use serde::{Deserialize, Serialize};

/// Supported bitcoinish coins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coin {
    #[default]
    Bitcoin,
    Litecoin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
}

impl Coin {
    /// Built-in profile for this coin on `network`.
    pub fn profile(self, network: NetworkType) -> NetworkProfile {
        match (self, network) {
            (Coin::Bitcoin, NetworkType::Mainnet) => BITCOIN_MAINNET,
            (Coin::Bitcoin, NetworkType::Testnet) => BITCOIN_TESTNET,
            (Coin::Litecoin, NetworkType::Mainnet) => LITECOIN_MAINNET,
            (Coin::Litecoin, NetworkType::Testnet) => LITECOIN_TESTNET,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "mainnet"),
            NetworkType::Testnet => write!(f, "testnet"),
        }
    }
}

/// Where funds come from or go to: one of our own HD indices, or any address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payport {
    Index(u32),
    Address { address: String },
}

impl Payport {
    pub fn address(address: impl Into<String>) -> Self {
        Payport::Address {
            address: address.into(),
        }
    }
}

impl From<u32> for Payport {
    fn from(index: u32) -> Self {
        Payport::Index(index)
    }
}

/// An amount owed to a payport, in main denomination (e.g. `"0.00005"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayportOutput {
    pub payport: Payport,
    pub amount: String,
}

/// Raw balance of one address as reported by the UTXO source, in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    #[serde(with = "serde_string")]
    pub confirmed: u64,
    #[serde(with = "serde_string")]
    pub unconfirmed: u64,
}

/// Balance of a payport in main denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub confirmed_balance: String,
    pub unconfirmed_balance: String,
    pub spendable_balance: String,
    /// Enough confirmed value to sweep without creating dust.
    pub sweepable: bool,
    /// Always false for UTXO chains.
    pub requires_activation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for FeeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeLevel::Low => write!(f, "low"),
            FeeLevel::Medium => write!(f, "medium"),
            FeeLevel::High => write!(f, "high"),
        }
    }
}

/// Unit of an explicit fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeRateType {
    /// Fixed total fee in main denomination.
    Main,
    /// Fixed total fee in base units.
    Base,
    /// Base units per virtual byte.
    BasePerWeight,
    /// Base units per raw byte.
    BasePerByte,
}

/// How the caller wants to pay fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeeOption {
    Rate {
        fee_rate: String,
        fee_rate_type: FeeRateType,
    },
    Level { fee_level: FeeLevel },
}

impl FeeOption {
    pub fn rate(fee_rate: impl Into<String>, fee_rate_type: FeeRateType) -> Self {
        FeeOption::Rate {
            fee_rate: fee_rate.into(),
            fee_rate_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransactionOptions {
    /// Defaults to the configured fee level.
    #[serde(default)]
    pub fee: Option<FeeOption>,
    #[serde(default)]
    pub use_unconfirmed_utxos: bool,
    /// Spend these instead of fetching the sender's UTXOs.
    #[serde(default)]
    pub utxos: Option<Vec<UtxoInfo>>,
    /// Overrides the configured pool size.
    #[serde(default)]
    pub target_utxo_pool_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Unsigned,
    Signed,
    Pending,
    Confirmed,
    Failed,
}

/// A created, not yet signed, transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub status: TransactionStatus,
    pub from_address: String,
    pub to_address: String,
    pub from_index: u32,
    /// Only set when the destination was given as an index.
    pub to_index: Option<u32>,
    /// Total paid to external outputs, in main denomination.
    pub amount: String,
    /// Fee in main denomination.
    pub fee: String,
    pub fee_rate: String,
    pub fee_rate_type: FeeRateType,
    pub fee_level: Option<FeeLevel>,
    /// The requested fee was under the minimum relay fee and was raised.
    #[serde(default)]
    pub fee_clamped: bool,
    pub input_utxos: Vec<UtxoInfo>,
    pub external_outputs: Vec<TxOutput>,
    pub data: PaymentTx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub status: TransactionStatus,
    /// Txid of the signed transaction.
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub from_index: u32,
    pub to_index: Option<u32>,
    pub amount: String,
    pub fee: String,
    /// Hex-encoded signed transaction.
    pub hex: String,
    pub unsigned_tx_hash: String,
    pub data: PaymentTx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub status: TransactionStatus,
    pub confirmations: u32,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    /// In main denomination, when the source reports it.
    pub fee: Option<String>,
    pub amount: Option<String>,
}
