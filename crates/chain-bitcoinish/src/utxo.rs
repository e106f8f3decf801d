use std::cmp::Ordering;
use std::str::FromStr;

use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::amount::serde_string;
use crate::error::BitcoinishError;
use crate::network::NetworkProfile;

/// A single unspent transaction output, as reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInfo {
    /// Transaction ID as a hex string (big-endian / display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in base units.
    #[serde(with = "serde_string")]
    pub value: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Block height, absent while the UTXO is in the mempool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u32>,
    /// HD index of the key that can spend this output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_index: Option<u32>,
}

impl UtxoInfo {
    /// A UTXO counts as confirmed when it has at least one confirmation, or,
    /// lacking a confirmation count, when it has been mined at a known height.
    pub fn is_confirmed(&self) -> bool {
        match self.confirmations {
            Some(confirmations) => confirmations > 0,
            None => self.height.is_some(),
        }
    }

    pub fn outpoint(&self) -> Result<OutPoint, BitcoinishError> {
        let txid = Txid::from_str(&self.txid).map_err(|e| {
            BitcoinishError::TransactionBuild(format!("invalid txid '{}': {e}", self.txid))
        })?;
        Ok(OutPoint::new(txid, self.vout))
    }
}

/// Selection order: largest value first, ties broken by txid then vout so
/// the same UTXO set always yields the same transaction.
pub fn selection_order(a: &UtxoInfo, b: &UtxoInfo) -> Ordering {
    b.value
        .cmp(&a.value)
        .then_with(|| a.txid.cmp(&b.txid))
        .then_with(|| a.vout.cmp(&b.vout))
}

/// Filter `utxos` down to those coin selection may spend, in selection order.
///
/// Unconfirmed outputs are dropped unless `use_unconfirmed` is set, and
/// outputs below the network's dust threshold are always dropped.
pub fn eligible_utxos<'a>(
    utxos: &'a [UtxoInfo],
    profile: &NetworkProfile,
    use_unconfirmed: bool,
) -> Vec<&'a UtxoInfo> {
    let mut eligible: Vec<&UtxoInfo> = utxos
        .iter()
        .filter(|u| use_unconfirmed || u.is_confirmed())
        .filter(|u| !profile.is_dust(u.value))
        .collect();
    eligible.sort_by(|a, b| selection_order(a, b));
    eligible
}

/// Sum of UTXO values, or `None` on overflow.
pub fn total_value<'a>(utxos: impl IntoIterator<Item = &'a UtxoInfo>) -> Option<u64> {
    utxos.into_iter().try_fold(0u64, |acc, u| acc.checked_add(u.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::BITCOIN_MAINNET;

    fn make_utxo(txid: &str, vout: u32, value: u64, confirmations: Option<u32>) -> UtxoInfo {
        UtxoInfo {
            txid: txid.to_string(),
            vout,
            value,
            address: None,
            height: None,
            confirmations,
            derivation_index: Some(0),
        }
    }

    #[test]
    fn confirmation_rules() {
        assert!(make_utxo("a", 0, 1, Some(3)).is_confirmed());
        assert!(!make_utxo("a", 0, 1, Some(0)).is_confirmed());
        assert!(!make_utxo("a", 0, 1, None).is_confirmed());

        let mut mined = make_utxo("a", 0, 1, None);
        mined.height = Some(613_152);
        assert!(mined.is_confirmed());
    }

    #[test]
    fn excludes_unconfirmed_by_default() {
        let utxos = vec![
            make_utxo("aa", 0, 10_000, Some(1)),
            make_utxo("bb", 0, 20_000, None),
        ];
        let eligible = eligible_utxos(&utxos, &BITCOIN_MAINNET, false);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].txid, "aa");

        let eligible = eligible_utxos(&utxos, &BITCOIN_MAINNET, true);
        assert_eq!(eligible.len(), 2);
    }

    #[test]
    fn excludes_dust() {
        let utxos = vec![
            make_utxo("aa", 0, 545, Some(1)),
            make_utxo("bb", 0, 546, Some(1)),
        ];
        let eligible = eligible_utxos(&utxos, &BITCOIN_MAINNET, false);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].value, 546);
    }

    #[test]
    fn orders_largest_first_with_deterministic_ties() {
        let utxos = vec![
            make_utxo("cc", 1, 5_000, Some(1)),
            make_utxo("bb", 0, 9_000, Some(1)),
            make_utxo("aa", 2, 5_000, Some(1)),
            make_utxo("aa", 1, 5_000, Some(1)),
        ];
        let order: Vec<(&str, u32)> = eligible_utxos(&utxos, &BITCOIN_MAINNET, false)
            .iter()
            .map(|u| (u.txid.as_str(), u.vout))
            .collect();
        assert_eq!(order, vec![("bb", 0), ("aa", 1), ("aa", 2), ("cc", 1)]);
    }

    #[test]
    fn outpoint_parses_txid() {
        let utxo = make_utxo(&"ab".repeat(32), 3, 1, None);
        let outpoint = utxo.outpoint().unwrap();
        assert_eq!(outpoint.vout, 3);
        assert_eq!(outpoint.txid.to_string(), "ab".repeat(32));

        assert!(make_utxo("nothex", 0, 1, None).outpoint().is_err());
    }

    #[test]
    fn total_value_detects_overflow() {
        let utxos = vec![make_utxo("a", 0, u64::MAX, None), make_utxo("b", 0, 1, None)];
        assert_eq!(total_value(&utxos), None);
        assert_eq!(total_value(&utxos[1..]), Some(1));
    }

    #[test]
    fn serializes_value_as_string() {
        let json = serde_json::to_value(make_utxo("aa", 0, 5_000_000, Some(8_753))).unwrap();
        assert_eq!(json["value"], "5000000");
        assert_eq!(json["confirmations"], 8_753);
        assert!(json.get("height").is_none());
    }
}
