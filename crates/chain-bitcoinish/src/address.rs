use std::fmt;
use std::str::FromStr;

use bech32::{segwit, Fe32};
use bitcoin::hashes::Hash;
use bitcoin::script::ScriptBuf;
use bitcoin::{CompressedPublicKey, PubkeyHash, ScriptHash, WitnessProgram, WitnessVersion};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BitcoinishError;
use crate::network::NetworkProfile;

/// The three single-key address encodings a wallet can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    #[serde(rename = "p2pkh")]
    Legacy,
    #[serde(rename = "p2sh-p2wpkh")]
    SegwitP2SH,
    #[serde(rename = "p2wpkh")]
    SegwitNative,
}

impl AddressType {
    /// BIP purpose field for the default account path (BIP44/49/84).
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::Legacy => 44,
            AddressType::SegwitP2SH => 49,
            AddressType::SegwitNative => 84,
        }
    }

    /// Script kind of outputs paying to this address type.
    pub fn output_kind(self) -> OutputScriptKind {
        match self {
            AddressType::Legacy => OutputScriptKind::P2pkh,
            AddressType::SegwitP2SH => OutputScriptKind::P2sh,
            AddressType::SegwitNative => OutputScriptKind::P2wpkh,
        }
    }

    pub fn is_segwit(self) -> bool {
        !matches!(self, AddressType::Legacy)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Legacy => write!(f, "p2pkh"),
            AddressType::SegwitP2SH => write!(f, "p2sh-p2wpkh"),
            AddressType::SegwitNative => write!(f, "p2wpkh"),
        }
    }
}

impl FromStr for AddressType {
    type Err = BitcoinishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p2pkh" => Ok(AddressType::Legacy),
            "p2sh-p2wpkh" => Ok(AddressType::SegwitP2SH),
            "p2wpkh" => Ok(AddressType::SegwitNative),
            other => Err(BitcoinishError::InvalidAddress(format!(
                "unknown address type '{other}'"
            ))),
        }
    }
}

/// Output script template, as far as size estimation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputScriptKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

/// A parsed address: its script template and the locking script it pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub kind: OutputScriptKind,
    pub script_pubkey: ScriptBuf,
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

fn base58check(version: u8, payload: &[u8]) -> String {
    bs58::encode(payload).with_check_version(version).into_string()
}

/// P2WPKH program wrapped by a P2SH-P2WPKH address: `OP_0 <hash160(pubkey)>`.
pub fn p2wpkh_redeem_script(pubkey: &CompressedPublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash())
}

/// Locking script for outputs owned by `pubkey` under `address_type`.
pub fn script_pubkey_for_key(pubkey: &CompressedPublicKey, address_type: AddressType) -> ScriptBuf {
    match address_type {
        AddressType::Legacy => ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
        AddressType::SegwitP2SH => {
            let redeem = p2wpkh_redeem_script(pubkey);
            ScriptBuf::new_p2sh(&ScriptHash::hash(redeem.as_bytes()))
        }
        AddressType::SegwitNative => ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()),
    }
}

/// Encode a 33-byte compressed secp256k1 public key as an address of the
/// given type on the given network.
pub fn public_key_to_address(
    pubkey_bytes: &[u8; 33],
    profile: &NetworkProfile,
    address_type: AddressType,
) -> Result<String, BitcoinishError> {
    CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BitcoinishError::InvalidKey(format!("failed to parse compressed public key: {e}"))
    })?;

    let key_hash = hash160(pubkey_bytes);
    match address_type {
        AddressType::Legacy => Ok(base58check(profile.p2pkh_version, &key_hash)),
        AddressType::SegwitP2SH => {
            let mut redeem = Vec::with_capacity(22);
            redeem.extend_from_slice(&[0x00, 0x14]);
            redeem.extend_from_slice(&key_hash);
            Ok(base58check(profile.p2sh_version, &hash160(&redeem)))
        }
        AddressType::SegwitNative => {
            let hrp = bech32::Hrp::parse(profile.bech32_hrp)
                .map_err(|e| BitcoinishError::InvalidAddress(format!("bad hrp: {e}")))?;
            segwit::encode(hrp, segwit::VERSION_0, &key_hash)
                .map_err(|e| BitcoinishError::InvalidAddress(format!("bech32 encoding failed: {e}")))
        }
    }
}

/// Parse an address for `profile`, rejecting addresses of other networks.
pub fn decode_address(address: &str, profile: &NetworkProfile) -> Result<DecodedAddress, BitcoinishError> {
    if let Ok((hrp, version, program)) = segwit::decode(address) {
        return decode_segwit(address, &hrp.as_str().to_ascii_lowercase(), version, &program, profile);
    }

    let data = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| BitcoinishError::InvalidAddress(format!("'{address}': {e}")))?;

    let (version, hash) = match data.split_first() {
        Some((version, hash)) if hash.len() == 20 => (*version, hash),
        _ => {
            return Err(BitcoinishError::InvalidAddress(format!(
                "'{address}': unexpected payload length {}",
                data.len()
            )))
        }
    };
    let mut hash_bytes = [0u8; 20];
    hash_bytes.copy_from_slice(hash);

    if version == profile.p2pkh_version {
        Ok(DecodedAddress {
            kind: OutputScriptKind::P2pkh,
            script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash_bytes)),
        })
    } else if version == profile.p2sh_version {
        Ok(DecodedAddress {
            kind: OutputScriptKind::P2sh,
            script_pubkey: ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash_bytes)),
        })
    } else {
        Err(BitcoinishError::InvalidAddress(format!(
            "'{address}' has version byte {version:#04x}, not valid for {profile}"
        )))
    }
}

fn decode_segwit(
    address: &str,
    hrp: &str,
    version: Fe32,
    program: &[u8],
    profile: &NetworkProfile,
) -> Result<DecodedAddress, BitcoinishError> {
    if hrp != profile.bech32_hrp {
        return Err(BitcoinishError::InvalidAddress(format!(
            "'{address}' has prefix '{hrp}', not valid for {profile}"
        )));
    }

    let kind = match (version.to_u8(), program.len()) {
        (0, 20) => OutputScriptKind::P2wpkh,
        (0, 32) => OutputScriptKind::P2wsh,
        (1, 32) => OutputScriptKind::P2tr,
        (v, len) => {
            return Err(BitcoinishError::InvalidAddress(format!(
                "'{address}': unsupported witness v{v} program of {len} bytes"
            )))
        }
    };

    let witness_version = WitnessVersion::try_from(version.to_u8())
        .map_err(|e| BitcoinishError::InvalidAddress(format!("'{address}': {e}")))?;
    let program = WitnessProgram::new(witness_version, program)
        .map_err(|e| BitcoinishError::InvalidAddress(format!("'{address}': {e}")))?;

    Ok(DecodedAddress {
        kind,
        script_pubkey: ScriptBuf::new_witness_program(&program),
    })
}

/// Whether `address` is a valid address on `profile`'s network. Never errors.
pub fn is_valid_address(address: &str, profile: &NetworkProfile) -> bool {
    decode_address(address, profile).is_ok()
}
