use thiserror::Error;

/// Errors raised by the bitcoinish transaction engine.
///
/// All of these are local input or programming errors: they are returned
/// immediately and never worth retrying with the same arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitcoinishError {
    #[error("invalid extended key: {0}")]
    InvalidKey(String),

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("derivation index overflow: {0}")]
    DerivationOverflow(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: have {have} base units, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("output value {value} is below the dust threshold of {threshold}")]
    DustOutput { value: u64, threshold: u64 },

    #[error("no signing key for derivation index {0}")]
    SigningKeyNotFound(u32),

    #[error("transaction build error: {0}")]
    TransactionBuild(String),

    #[error("signing error: {0}")]
    Signing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_key() {
        let err = BitcoinishError::InvalidKey("bad checksum".into());
        assert_eq!(err.to_string(), "invalid extended key: bad checksum");
    }

    #[test]
    fn display_invalid_path() {
        let err = BitcoinishError::InvalidPath("segment 'x'".into());
        assert_eq!(err.to_string(), "invalid derivation path: segment 'x'");
    }

    #[test]
    fn display_insufficient_funds() {
        let err = BitcoinishError::InsufficientFunds { have: 1_000, need: 5_940 };
        assert_eq!(
            err.to_string(),
            "insufficient funds: have 1000 base units, need 5940"
        );
    }

    #[test]
    fn display_dust_output() {
        let err = BitcoinishError::DustOutput { value: 100, threshold: 546 };
        assert_eq!(
            err.to_string(),
            "output value 100 is below the dust threshold of 546"
        );
    }

    #[test]
    fn display_signing_key_not_found() {
        let err = BitcoinishError::SigningKeyNotFound(7);
        assert_eq!(err.to_string(), "no signing key for derivation index 7");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> =
            Box::new(BitcoinishError::InvalidAddress("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
