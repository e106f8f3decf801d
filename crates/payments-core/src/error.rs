use std::fmt;

use chain_bitcoinish::error::BitcoinishError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("Transaction '{0}' not found")]
    TransactionNotFound(String),

    #[error("Broadcast rejected: {0}")]
    TransactionBroadcast(String),

    /// A collaborator (indexer, node, fee service) failed. Surfaced as-is,
    /// never retried here.
    #[error("{context}: {message}")]
    Source { context: String, message: String },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Fee level unavailable: {0}")]
    FeeLevelUnavailable(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error(transparent)]
    Core(#[from] BitcoinishError),
}

impl PaymentsError {
    /// Wrap a collaborator failure with what was being attempted.
    pub fn source(context: impl Into<String>, err: impl fmt::Display) -> Self {
        PaymentsError::Source {
            context: context.into(),
            message: err.to_string(),
        }
    }
}
