//! External collaborators the payments facade talks to.
//!
//! Implementations wrap an indexer, a node or a fee service. Each call is a
//! single request; retry policy belongs to the implementation.

use async_trait::async_trait;
use chain_bitcoinish::fee::FeeRate;
use chain_bitcoinish::utxo::UtxoInfo;

use crate::error::PaymentsError;
use crate::types::{AddressBalance, BroadcastResult, FeeLevel, NetworkType, TransactionInfo};

#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn get_utxos(&self, address: &str) -> Result<Vec<UtxoInfo>, PaymentsError>;

    async fn get_balance(&self, address: &str) -> Result<AddressBalance, PaymentsError>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submit a signed transaction. Node rejections are
    /// [`PaymentsError::TransactionBroadcast`] carrying the node's reason.
    async fn broadcast(&self, raw_hex: &str) -> Result<BroadcastResult, PaymentsError>;
}

#[async_trait]
pub trait TxInfoSource: Send + Sync {
    /// Unknown ids are [`PaymentsError::TransactionNotFound`].
    async fn get_transaction_info(&self, txid: &str) -> Result<TransactionInfo, PaymentsError>;
}

#[async_trait]
pub trait FeeLevelSource: Send + Sync {
    /// Fee rate per virtual byte for a named level.
    async fn get_fee_rate(&self, level: FeeLevel, network: NetworkType) -> Result<FeeRate, PaymentsError>;
}
