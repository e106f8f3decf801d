//! Shared engine for bitcoinish (Bitcoin-derived UTXO) chains.
//!
//! Every chain-specific constant lives on a [`network::NetworkProfile`]; the
//! modules here derive keys and addresses, estimate fees, select coins and
//! assemble and sign transactions against whichever profile they are given.

pub mod address;
pub mod amount;
pub mod bip44;
pub mod coin_selection;
pub mod error;
pub mod fee;
pub mod network;
pub mod transaction;
pub mod utxo;

pub use address::AddressType;
pub use error::BitcoinishError;
pub use network::NetworkProfile;
