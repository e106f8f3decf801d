use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf, ScriptBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{
    decode_address, p2wpkh_redeem_script, script_pubkey_for_key, AddressType, OutputScriptKind,
};
use crate::amount::serde_string;
use crate::bip44::KeyPair;
use crate::error::BitcoinishError;
use crate::network::NetworkProfile;
use crate::utxo::{total_value, UtxoInfo};

/// Version, locktime and the two one-byte counts.
const TX_OVERHEAD_VBYTES: u64 = 10;

/// Segwit marker and flag bytes, paid once if any input carries a witness.
const SEGWIT_MARKER_BYTES: u64 = 2;

/// Estimated size of a transaction, in virtual bytes and in raw serialized
/// bytes (witness included at full cost).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSize {
    pub vbytes: u64,
    pub bytes: u64,
}

fn input_size(input_type: AddressType) -> TxSize {
    match input_type {
        AddressType::Legacy => TxSize { vbytes: 148, bytes: 148 },
        AddressType::SegwitP2SH => TxSize { vbytes: 91, bytes: 172 },
        AddressType::SegwitNative => TxSize { vbytes: 68, bytes: 149 },
    }
}

fn output_size(kind: OutputScriptKind) -> u64 {
    match kind {
        // Base58 destinations are costed alike.
        OutputScriptKind::P2pkh | OutputScriptKind::P2sh => 34,
        OutputScriptKind::P2wpkh => 31,
        OutputScriptKind::P2wsh | OutputScriptKind::P2tr => 43,
    }
}

/// Extra bytes a CompactSize count needs beyond the single byte already in
/// the overhead.
fn count_extra_bytes(count: usize) -> u64 {
    match count {
        0..=0xfc => 0,
        0xfd..=0xffff => 2,
        0x1_0000..=0xffff_ffff => 4,
        _ => 8,
    }
}

/// Estimate the size of a transaction spending `input_count` inputs of
/// `input_type` into outputs of the given script kinds.
///
/// Signatures are assumed to be 72 bytes, which overestimates slightly and
/// never underpays.
pub fn estimate_tx_size(
    input_type: AddressType,
    input_count: usize,
    outputs: &[OutputScriptKind],
) -> TxSize {
    let overhead = TX_OVERHEAD_VBYTES + count_extra_bytes(input_count) + count_extra_bytes(outputs.len());
    let mut size = TxSize {
        vbytes: overhead,
        bytes: overhead,
    };
    if input_type.is_segwit() && input_count > 0 {
        size.bytes += SEGWIT_MARKER_BYTES;
    }

    let per_input = input_size(input_type);
    size.vbytes += per_input.vbytes * input_count as u64;
    size.bytes += per_input.bytes * input_count as u64;

    let output_bytes: u64 = outputs.iter().map(|kind| output_size(*kind)).sum();
    size.vbytes += output_bytes;
    size.bytes += output_bytes;
    size
}

/// A payment to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    #[serde(with = "serde_string")]
    pub value: u64,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, value: u64) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

/// A change destination and its relative share of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedChangeOutput {
    pub address: String,
    pub weight: u64,
}

/// A fully specified, unsigned payment.
///
/// This is the data carried between creating and signing a transaction, so
/// it serializes with amounts as strings to survive JSON round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTx {
    pub inputs: Vec<UtxoInfo>,
    /// External outputs followed by change outputs, in transaction order.
    pub outputs: Vec<TxOutput>,
    #[serde(with = "serde_string")]
    pub fee: u64,
    /// Total value sent back to the wallet.
    #[serde(with = "serde_string")]
    pub change: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_address: Option<String>,
    #[serde(default)]
    pub external_outputs: Vec<TxOutput>,
    #[serde(default, with = "serde_string")]
    pub external_output_total: u64,
    #[serde(default)]
    pub change_outputs: Vec<TxOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_hash: Option<String>,
}

impl PaymentTx {
    pub fn input_total(&self) -> Option<u64> {
        total_value(&self.inputs)
    }

    pub fn output_total(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Inputs exactly cover outputs plus fee.
    pub fn is_balanced(&self) -> bool {
        match (self.input_total(), self.output_total()) {
            (Some(inputs), Some(outputs)) => outputs.checked_add(self.fee) == Some(inputs),
            _ => false,
        }
    }
}

/// Build the unsigned transaction for the given inputs and outputs.
///
/// The external and change outputs are kept in the order given, externals
/// first. Fails if any output is dust, if the amounts don't balance, or if an
/// address or txid can't be parsed.
pub fn build_unsigned_tx(
    inputs: Vec<UtxoInfo>,
    external_outputs: Vec<TxOutput>,
    change_outputs: Vec<TxOutput>,
    fee: u64,
    profile: &NetworkProfile,
) -> Result<PaymentTx, BitcoinishError> {
    if inputs.is_empty() {
        return Err(BitcoinishError::TransactionBuild("transaction has no inputs".into()));
    }
    if external_outputs.is_empty() && change_outputs.is_empty() {
        return Err(BitcoinishError::TransactionBuild("transaction has no outputs".into()));
    }

    let outputs: Vec<TxOutput> = external_outputs
        .iter()
        .chain(change_outputs.iter())
        .cloned()
        .collect();
    if let Some(dust) = outputs.iter().find(|o| profile.is_dust(o.value)) {
        return Err(BitcoinishError::DustOutput {
            value: dust.value,
            threshold: profile.dust_threshold,
        });
    }

    let overflow = || BitcoinishError::InvalidAmount("output total overflows".into());
    let external_output_total = external_outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value))
        .ok_or_else(overflow)?;
    let change = change_outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value))
        .ok_or_else(overflow)?;

    let mut payment = PaymentTx {
        inputs,
        outputs,
        fee,
        change,
        change_address: change_outputs.first().map(|o| o.address.clone()),
        external_outputs,
        external_output_total,
        change_outputs,
        raw_hex: None,
        raw_hash: None,
    };
    if !payment.is_balanced() {
        return Err(BitcoinishError::TransactionBuild(format!(
            "inputs {:?} do not equal outputs {:?} plus fee {fee}",
            payment.input_total(),
            payment.output_total()
        )));
    }

    let tx = to_bitcoin_tx(&payment, profile)?;
    payment.raw_hex = Some(serialize_hex(&tx));
    payment.raw_hash = Some(tx.compute_txid().to_string());

    debug!(
        network = profile.name,
        inputs = payment.inputs.len(),
        outputs = payment.outputs.len(),
        fee,
        change,
        "built unsigned transaction"
    );
    Ok(payment)
}

/// Rebuild the consensus transaction described by `payment`, with empty
/// scriptSigs and witnesses.
fn to_bitcoin_tx(payment: &PaymentTx, profile: &NetworkProfile) -> Result<Transaction, BitcoinishError> {
    let input = payment
        .inputs
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: utxo.outpoint()?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            })
        })
        .collect::<Result<Vec<_>, BitcoinishError>>()?;

    let output = payment
        .outputs
        .iter()
        .map(|o| {
            Ok(TxOut {
                value: Amount::from_sat(o.value),
                script_pubkey: decode_address(&o.address, profile)?.script_pubkey,
            })
        })
        .collect::<Result<Vec<_>, BitcoinishError>>()?;

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    })
}

/// A signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPaymentTx {
    pub payment: PaymentTx,
    /// Hex-encoded signed transaction.
    pub hex: String,
    pub txid: String,
    /// Txid of the transaction before signing. Equals `txid` for segwit-only
    /// spends.
    pub unsigned_tx_hash: String,
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, BitcoinishError> {
    PushBytesBuf::try_from(bytes).map_err(|e| BitcoinishError::Signing(format!("push too large: {e}")))
}

/// Sign every input of `payment` with the key at its derivation index.
///
/// All inputs are spent as `address_type`. The transaction is rebuilt from
/// the payment's inputs and outputs rather than parsed from `raw_hex`, so a
/// stale or tampered hex string cannot change what gets signed. Signing is
/// deterministic (RFC6979): signing the same payment twice yields the same
/// bytes.
pub fn sign_transaction(
    payment: &PaymentTx,
    address_type: AddressType,
    keys: &BTreeMap<u32, KeyPair>,
    profile: &NetworkProfile,
) -> Result<SignedPaymentTx, BitcoinishError> {
    if !payment.is_balanced() {
        return Err(BitcoinishError::TransactionBuild(
            "inputs do not equal outputs plus fee".into(),
        ));
    }

    let unsigned = to_bitcoin_tx(payment, profile)?;
    let secp = Secp256k1::new();
    let mut sighash_cache = SighashCache::new(&unsigned);
    let mut signed = unsigned.clone();

    for (input_index, utxo) in payment.inputs.iter().enumerate() {
        let derivation_index = utxo.derivation_index.ok_or_else(|| {
            BitcoinishError::Signing(format!(
                "input {}:{} has no derivation index",
                utxo.txid, utxo.vout
            ))
        })?;
        let key_pair = keys
            .get(&derivation_index)
            .ok_or(BitcoinishError::SigningKeyNotFound(derivation_index))?;
        let secret_key = key_pair.secret_key()?;
        let public_key = key_pair.public_key;

        let sighash = match address_type {
            AddressType::Legacy => {
                let script_code = script_pubkey_for_key(&public_key, AddressType::Legacy);
                sighash_cache
                    .legacy_signature_hash(input_index, &script_code, EcdsaSighashType::All.to_u32())
                    .map_err(|e| BitcoinishError::Signing(format!("sighash computation failed: {e}")))?
                    .to_byte_array()
            }
            AddressType::SegwitP2SH | AddressType::SegwitNative => {
                let script_code = p2wpkh_redeem_script(&public_key);
                sighash_cache
                    .p2wpkh_signature_hash(
                        input_index,
                        &script_code,
                        Amount::from_sat(utxo.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| BitcoinishError::Signing(format!("sighash computation failed: {e}")))?
                    .to_byte_array()
            }
        };

        let msg = Message::from_digest(sighash);
        let signature = secp.sign_ecdsa(&msg, &secret_key);

        // DER signature followed by the sighash type byte.
        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All as u8);
        let pubkey_bytes = public_key.0.serialize();

        let input = &mut signed.input[input_index];
        match address_type {
            AddressType::Legacy => {
                input.script_sig = Builder::new()
                    .push_slice(push_bytes(sig_bytes)?)
                    .push_slice(push_bytes(pubkey_bytes.to_vec())?)
                    .into_script();
            }
            AddressType::SegwitP2SH => {
                let redeem = p2wpkh_redeem_script(&public_key);
                input.script_sig = Builder::new()
                    .push_slice(push_bytes(redeem.into_bytes())?)
                    .into_script();
                input.witness = p2wpkh_witness(&sig_bytes, &pubkey_bytes);
            }
            AddressType::SegwitNative => {
                input.witness = p2wpkh_witness(&sig_bytes, &pubkey_bytes);
            }
        }
    }

    let txid = signed.compute_txid().to_string();
    debug!(network = profile.name, %txid, inputs = signed.input.len(), "signed transaction");

    Ok(SignedPaymentTx {
        payment: payment.clone(),
        hex: serialize_hex(&signed),
        txid,
        unsigned_tx_hash: unsigned.compute_txid().to_string(),
    })
}

fn p2wpkh_witness(sig_bytes: &[u8], pubkey_bytes: &[u8]) -> Witness {
    let mut witness = Witness::new();
    witness.push(sig_bytes);
    witness.push(pubkey_bytes);
    witness
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bip44::{derive_address, derive_key_pair, HdNode};
    use crate::network::{BITCOIN_MAINNET, LITECOIN_MAINNET};
    use bitcoin::consensus::encode::deserialize;
    use bitcoin::script::Instruction;
    use bitcoin::secp256k1::ecdsa::Signature;

    const ROOT_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk2stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
    const RECIPIENT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn root() -> HdNode {
        HdNode::from_base58(ROOT_XPRV, &BITCOIN_MAINNET).unwrap()
    }

    fn keys(indices: &[u32]) -> BTreeMap<u32, KeyPair> {
        let node = root();
        indices
            .iter()
            .map(|i| (*i, derive_key_pair(&node, *i).unwrap()))
            .collect()
    }

    fn make_utxo(txid_byte: &str, value: u64, derivation_index: u32) -> UtxoInfo {
        UtxoInfo {
            txid: txid_byte.repeat(32),
            vout: 0,
            value,
            address: None,
            height: Some(600_000),
            confirmations: Some(10),
            derivation_index: Some(derivation_index),
        }
    }

    fn simple_payment(address_type: AddressType) -> PaymentTx {
        let change = derive_address(&root(), 1, &BITCOIN_MAINNET, address_type).unwrap();
        build_unsigned_tx(
            vec![make_utxo("ab", 100_000, 0), make_utxo("cd", 50_000, 1)],
            vec![TxOutput::new(RECIPIENT, 120_000)],
            vec![TxOutput::new(change, 29_000)],
            1_000,
            &BITCOIN_MAINNET,
        )
        .unwrap()
    }

    #[test]
    fn size_of_native_segwit_send_with_change() {
        let size = estimate_tx_size(
            AddressType::SegwitNative,
            1,
            &[OutputScriptKind::P2wpkh, OutputScriptKind::P2wpkh],
        );
        assert_eq!(size.vbytes, 140);
        assert_eq!(size.bytes, 10 + 2 + 149 + 62);
    }

    #[test]
    fn size_of_single_output_sweep() {
        let to_p2pkh = estimate_tx_size(AddressType::SegwitNative, 1, &[OutputScriptKind::P2pkh]);
        let to_p2sh = estimate_tx_size(AddressType::SegwitNative, 1, &[OutputScriptKind::P2sh]);
        assert_eq!(to_p2pkh.vbytes, 112);
        assert_eq!(to_p2sh.vbytes, 112);
    }

    #[test]
    fn legacy_inputs_have_no_witness_discount() {
        let size = estimate_tx_size(AddressType::Legacy, 2, &[OutputScriptKind::P2pkh]);
        assert_eq!(size.vbytes, 10 + 2 * 148 + 34);
        assert_eq!(size.vbytes, size.bytes);
    }

    #[test]
    fn size_grows_per_input() {
        let one = estimate_tx_size(AddressType::SegwitP2SH, 1, &[OutputScriptKind::P2sh]);
        let two = estimate_tx_size(AddressType::SegwitP2SH, 2, &[OutputScriptKind::P2sh]);
        assert_eq!(two.vbytes - one.vbytes, 91);
        assert_eq!(two.bytes - one.bytes, 172);
    }

    #[test]
    fn large_output_counts_need_wider_varint() {
        let outputs = vec![OutputScriptKind::P2wpkh; 253];
        let size = estimate_tx_size(AddressType::SegwitNative, 1, &outputs);
        assert_eq!(size.vbytes, 10 + 2 + 68 + 253 * 31);
    }

    #[test]
    fn build_records_outputs_in_order() {
        let payment = simple_payment(AddressType::SegwitNative);
        assert_eq!(payment.outputs.len(), 2);
        assert_eq!(payment.outputs[0].address, RECIPIENT);
        assert_eq!(payment.external_output_total, 120_000);
        assert_eq!(payment.change, 29_000);
        assert_eq!(payment.change_address.as_deref(), Some(payment.outputs[1].address.as_str()));
        assert!(payment.is_balanced());

        let raw = hex::decode(payment.raw_hex.as_ref().unwrap()).unwrap();
        let tx: Transaction = deserialize(&raw).unwrap();
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), 120_000);
        assert_eq!(tx.output[1].value.to_sat(), 29_000);
        assert_eq!(tx.compute_txid().to_string(), payment.raw_hash.unwrap());
    }

    #[test]
    fn build_rejects_unbalanced_amounts() {
        let err = build_unsigned_tx(
            vec![make_utxo("ab", 100_000, 0)],
            vec![TxOutput::new(RECIPIENT, 90_000)],
            vec![],
            1_000,
            &BITCOIN_MAINNET,
        )
        .unwrap_err();
        assert!(matches!(err, BitcoinishError::TransactionBuild(_)));
    }

    #[test]
    fn build_rejects_dust_outputs() {
        let err = build_unsigned_tx(
            vec![make_utxo("ab", 100_000, 0)],
            vec![TxOutput::new(RECIPIENT, 500)],
            vec![],
            99_500,
            &BITCOIN_MAINNET,
        )
        .unwrap_err();
        assert_eq!(err, BitcoinishError::DustOutput { value: 500, threshold: 546 });
    }

    #[test]
    fn build_rejects_wrong_network_address() {
        let err = build_unsigned_tx(
            vec![make_utxo("ab", 100_000, 0)],
            vec![TxOutput::new(RECIPIENT, 99_000)],
            vec![],
            1_000,
            &LITECOIN_MAINNET,
        )
        .unwrap_err();
        assert!(matches!(err, BitcoinishError::InvalidAddress(_)));
    }

    #[test]
    fn build_rejects_empty_inputs() {
        let err = build_unsigned_tx(vec![], vec![TxOutput::new(RECIPIENT, 1_000)], vec![], 0, &BITCOIN_MAINNET)
            .unwrap_err();
        assert!(matches!(err, BitcoinishError::TransactionBuild(_)));
    }

    #[test]
    fn payment_tx_json_uses_string_amounts() {
        let payment = simple_payment(AddressType::SegwitNative);
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["fee"], "1000");
        assert_eq!(json["outputs"][0]["value"], "120000");

        let back: PaymentTx = serde_json::from_value(json).unwrap();
        assert_eq!(back, payment);
    }

    #[test]
    fn sign_native_segwit_fills_witnesses_only() {
        let payment = simple_payment(AddressType::SegwitNative);
        let signed = sign_transaction(&payment, AddressType::SegwitNative, &keys(&[0, 1]), &BITCOIN_MAINNET)
            .unwrap();

        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();
        for input in &tx.input {
            assert!(input.script_sig.is_empty());
            assert_eq!(input.witness.len(), 2);
        }
        // Witness data does not change the txid.
        assert_eq!(signed.txid, signed.unsigned_tx_hash);
        assert_eq!(Some(&signed.unsigned_tx_hash), payment.raw_hash.as_ref());
    }

    #[test]
    fn sign_native_segwit_signatures_verify() {
        let payment = simple_payment(AddressType::SegwitNative);
        let key_map = keys(&[0, 1]);
        let signed = sign_transaction(&payment, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET).unwrap();
        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();

        let unsigned: Transaction = deserialize(&hex::decode(payment.raw_hex.as_ref().unwrap()).unwrap()).unwrap();
        let mut cache = SighashCache::new(&unsigned);
        let secp = Secp256k1::verification_only();

        for (i, utxo) in payment.inputs.iter().enumerate() {
            let key = &key_map[&utxo.derivation_index.unwrap()];
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &p2wpkh_redeem_script(&key.public_key),
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .unwrap();
            let sig_with_type = tx.input[i].witness.nth(0).unwrap();
            let sig = Signature::from_der(&sig_with_type[..sig_with_type.len() - 1]).unwrap();
            let msg = Message::from_digest(sighash.to_byte_array());
            assert!(secp.verify_ecdsa(&msg, &sig, &key.public_key.0).is_ok());
            assert_eq!(tx.input[i].witness.nth(1).unwrap(), key.public_key.0.serialize());
        }
    }

    fn assert_signature_valid(sig_with_type: &[u8], sighash: [u8; 32], key: &KeyPair) {
        let (sighash_type, der) = sig_with_type.split_last().unwrap();
        assert_eq!(*sighash_type, EcdsaSighashType::All as u8);
        let sig = Signature::from_der(der).unwrap();
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(sighash);
        assert!(secp.verify_ecdsa(&msg, &sig, &key.public_key.0).is_ok());
    }

    fn script_pushes(script: &bitcoin::Script) -> Vec<Vec<u8>> {
        script
            .instructions()
            .map(|ins| match ins.unwrap() {
                Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
                Instruction::Op(op) => panic!("unexpected opcode {op:?}"),
            })
            .collect()
    }

    #[test]
    fn sign_legacy_signatures_verify() {
        let payment = simple_payment(AddressType::Legacy);
        let key_map = keys(&[0, 1]);
        let signed = sign_transaction(&payment, AddressType::Legacy, &key_map, &BITCOIN_MAINNET).unwrap();
        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();

        let unsigned: Transaction = deserialize(&hex::decode(payment.raw_hex.as_ref().unwrap()).unwrap()).unwrap();
        let cache = SighashCache::new(&unsigned);

        for (i, utxo) in payment.inputs.iter().enumerate() {
            let key = &key_map[&utxo.derivation_index.unwrap()];
            let script_code = script_pubkey_for_key(&key.public_key, AddressType::Legacy);
            let sighash = cache
                .legacy_signature_hash(i, &script_code, EcdsaSighashType::All.to_u32())
                .unwrap();

            let pushes = script_pushes(&tx.input[i].script_sig);
            assert_eq!(pushes.len(), 2);
            assert_signature_valid(&pushes[0], sighash.to_byte_array(), key);
            assert_eq!(pushes[1], key.public_key.0.serialize().to_vec());
        }
    }

    #[test]
    fn sign_p2sh_segwit_signatures_verify() {
        let payment = simple_payment(AddressType::SegwitP2SH);
        let key_map = keys(&[0, 1]);
        let signed = sign_transaction(&payment, AddressType::SegwitP2SH, &key_map, &BITCOIN_MAINNET).unwrap();
        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();

        let unsigned: Transaction = deserialize(&hex::decode(payment.raw_hex.as_ref().unwrap()).unwrap()).unwrap();
        let mut cache = SighashCache::new(&unsigned);

        for (i, utxo) in payment.inputs.iter().enumerate() {
            let key = &key_map[&utxo.derivation_index.unwrap()];
            let redeem = p2wpkh_redeem_script(&key.public_key);
            let sighash = cache
                .p2wpkh_signature_hash(i, &redeem, Amount::from_sat(utxo.value), EcdsaSighashType::All)
                .unwrap();

            assert_eq!(script_pushes(&tx.input[i].script_sig), vec![redeem.to_bytes()]);
            assert_signature_valid(tx.input[i].witness.nth(0).unwrap(), sighash.to_byte_array(), key);
            assert_eq!(tx.input[i].witness.nth(1).unwrap(), key.public_key.0.serialize());
        }
    }

    #[test]
    fn sign_legacy_fills_script_sig() {
        let payment = simple_payment(AddressType::Legacy);
        let signed = sign_transaction(&payment, AddressType::Legacy, &keys(&[0, 1]), &BITCOIN_MAINNET).unwrap();

        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();
        for input in &tx.input {
            assert!(!input.script_sig.is_empty());
            assert!(input.witness.is_empty());
        }
        assert_ne!(signed.txid, signed.unsigned_tx_hash);
    }

    #[test]
    fn sign_p2sh_segwit_pushes_redeem_script() {
        let payment = simple_payment(AddressType::SegwitP2SH);
        let key_map = keys(&[0, 1]);
        let signed = sign_transaction(&payment, AddressType::SegwitP2SH, &key_map, &BITCOIN_MAINNET).unwrap();

        let tx: Transaction = deserialize(&hex::decode(&signed.hex).unwrap()).unwrap();
        let redeem = p2wpkh_redeem_script(&key_map[&0].public_key);
        // 0x16 pushes the 22-byte redeem script.
        let mut expected = vec![0x16];
        expected.extend_from_slice(redeem.as_bytes());
        assert_eq!(tx.input[0].script_sig.as_bytes(), expected.as_slice());
        assert_eq!(tx.input[0].witness.len(), 2);
    }

    #[test]
    fn signing_is_deterministic() {
        let payment = simple_payment(AddressType::SegwitNative);
        let key_map = keys(&[0, 1]);
        let first = sign_transaction(&payment, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET).unwrap();
        let second = sign_transaction(&payment, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET).unwrap();
        assert_eq!(first.hex, second.hex);
        assert_eq!(first.txid, second.txid);
    }

    #[test]
    fn sign_fails_without_matching_key() {
        let payment = simple_payment(AddressType::SegwitNative);
        let err = sign_transaction(&payment, AddressType::SegwitNative, &keys(&[0]), &BITCOIN_MAINNET)
            .unwrap_err();
        assert_eq!(err, BitcoinishError::SigningKeyNotFound(1));
    }

    #[test]
    fn sign_fails_with_public_only_keys() {
        let payment = simple_payment(AddressType::SegwitNative);
        let public = root().to_public();
        let key_map: BTreeMap<u32, KeyPair> = [0, 1]
            .into_iter()
            .map(|i| (i, derive_key_pair(&public, i).unwrap()))
            .collect();
        let err = sign_transaction(&payment, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET)
            .unwrap_err();
        assert!(matches!(err, BitcoinishError::InvalidKey(_)));
    }

    #[test]
    fn sign_ignores_stale_raw_hex() {
        let payment = simple_payment(AddressType::SegwitNative);
        let mut tampered = payment.clone();
        tampered.raw_hex = Some("00".into());
        let key_map = keys(&[0, 1]);
        let a = sign_transaction(&payment, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET).unwrap();
        let b = sign_transaction(&tampered, AddressType::SegwitNative, &key_map, &BITCOIN_MAINNET).unwrap();
        assert_eq!(a.hex, b.hex);
    }

    #[test]
    fn sign_rejects_unbalanced_payment() {
        let mut payment = simple_payment(AddressType::SegwitNative);
        payment.fee += 1;
        let err = sign_transaction(&payment, AddressType::SegwitNative, &keys(&[0, 1]), &BITCOIN_MAINNET)
            .unwrap_err();
        assert!(matches!(err, BitcoinishError::TransactionBuild(_)));
    }
}
