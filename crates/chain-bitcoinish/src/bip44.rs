//! Hierarchical-deterministic key derivation for bitcoinish wallets.
//!
//! Account keys live at `m/purpose'/coin_type'/account'` and addresses are
//! derived below them with the fixed `change/index` convention, where the
//! external chain is `0`:
//!
//! - Legacy:       m/44'/coin'/0'/0/index
//! - SegwitP2SH:   m/49'/coin'/0'/0/index
//! - SegwitNative: m/84'/coin'/0'/0/index

use std::fmt;

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::CompressedPublicKey;
use zeroize::Zeroize;

use crate::address::{public_key_to_address, AddressType};
use crate::error::BitcoinishError;
use crate::network::{NetworkProfile, BIP32_MAINNET};

/// Largest non-hardened child index.
pub const MAX_CHILD_INDEX: u32 = 0x7fff_ffff;

/// Serialized length of an extended key, before the base58 checksum.
const EXTENDED_KEY_LEN: usize = 78;

/// BIP32 caps depth at one byte.
const MAX_DEPTH: usize = u8::MAX as usize;

/// Default account path for an address type: `m/purpose'/coin_type'/0'`.
pub fn default_derivation_path(address_type: AddressType, profile: &NetworkProfile) -> String {
    format!("m/{}'/{}'/0'", address_type.purpose(), profile.coin_type)
}

/// Split "m/44'/2'/0'" into ["44'", "2'", "0'"].
pub fn split_derivation_path(path: &str) -> Vec<String> {
    let path = path.trim();
    let path = match path {
        "m" | "M" | "" => return Vec::new(),
        p => p
            .strip_prefix("m/")
            .or_else(|| p.strip_prefix("M/"))
            .unwrap_or(p),
    };
    path.split('/').map(str::to_string).collect()
}

/// Parse a derivation path into child numbers.
///
/// Hardened segments may be marked with `'`, `h` or `H`.
pub fn parse_derivation_path(path: &str) -> Result<Vec<ChildNumber>, BitcoinishError> {
    split_derivation_path(path)
        .iter()
        .map(|segment| parse_segment(segment))
        .collect()
}

fn parse_segment(segment: &str) -> Result<ChildNumber, BitcoinishError> {
    let (num_str, hardened) = match segment
        .strip_suffix('\'')
        .or_else(|| segment.strip_suffix('h'))
        .or_else(|| segment.strip_suffix('H'))
    {
        Some(stripped) => (stripped, true),
        None => (segment, false),
    };

    if num_str.is_empty() || !num_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(BitcoinishError::InvalidPath(format!(
            "malformed path segment '{segment}'"
        )));
    }

    let index = num_str
        .parse::<u64>()
        .ok()
        .and_then(|i| u32::try_from(i).ok())
        .filter(|i| *i <= MAX_CHILD_INDEX)
        .ok_or_else(|| {
            BitcoinishError::DerivationOverflow(format!(
                "path segment '{segment}' exceeds {MAX_CHILD_INDEX}"
            ))
        })?;

    child_number(index, hardened)
}

fn child_number(index: u32, hardened: bool) -> Result<ChildNumber, BitcoinishError> {
    let child = if hardened {
        ChildNumber::from_hardened_idx(index)
    } else {
        ChildNumber::from_normal_idx(index)
    };
    child.map_err(|e| BitcoinishError::DerivationOverflow(format!("index {index}: {e}")))
}

/// An extended key at some depth of the tree. Derived children are new values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HdNode {
    Private(Xpriv),
    Public(Xpub),
}

impl HdNode {
    /// Parse a base58 extended key, requiring the profile's version bytes.
    pub fn from_base58(key: &str, profile: &NetworkProfile) -> Result<Self, BitcoinishError> {
        let mut data = bs58::decode(key.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| BitcoinishError::InvalidKey(format!("base58 decoding failed: {e}")))?;

        if data.len() != EXTENDED_KEY_LEN {
            return Err(BitcoinishError::InvalidKey(format!(
                "expected {EXTENDED_KEY_LEN} bytes, got {}",
                data.len()
            )));
        }

        // The bitcoin crate only knows xprv/tprv, so the profile's version
        // bytes are checked here and swapped for xprv/xpub before decoding.
        let version: [u8; 4] = [data[0], data[1], data[2], data[3]];
        let node = if version == profile.bip32.private {
            data[..4].copy_from_slice(&BIP32_MAINNET.private);
            Xpriv::decode(&data).map(HdNode::Private)
        } else if version == profile.bip32.public {
            data[..4].copy_from_slice(&BIP32_MAINNET.public);
            Xpub::decode(&data).map(HdNode::Public)
        } else {
            data.zeroize();
            return Err(BitcoinishError::InvalidKey(format!(
                "version bytes {} are not valid for {profile}",
                hex::encode(version)
            )));
        };
        data.zeroize();

        node.map_err(|e| BitcoinishError::InvalidKey(e.to_string()))
    }

    /// Base58check serialization with the profile's version bytes.
    pub fn to_base58(&self, profile: &NetworkProfile) -> String {
        let (mut data, version) = match self {
            HdNode::Private(xpriv) => (xpriv.encode(), profile.bip32.private),
            HdNode::Public(xpub) => (xpub.encode(), profile.bip32.public),
        };
        data[..4].copy_from_slice(&version);
        let encoded = bs58::encode(&data[..]).with_check().into_string();
        data.zeroize();
        encoded
    }

    pub fn depth(&self) -> u8 {
        match self {
            HdNode::Private(xpriv) => xpriv.depth,
            HdNode::Public(xpub) => xpub.depth,
        }
    }

    pub fn child_number(&self) -> ChildNumber {
        match self {
            HdNode::Private(xpriv) => xpriv.child_number,
            HdNode::Public(xpub) => xpub.child_number,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, HdNode::Private(_))
    }

    /// The same node with private material stripped.
    pub fn to_public(&self) -> HdNode {
        match self {
            HdNode::Private(xpriv) => HdNode::Public(Xpub::from_priv(&Secp256k1::new(), xpriv)),
            HdNode::Public(xpub) => HdNode::Public(*xpub),
        }
    }

    pub fn public_key(&self) -> CompressedPublicKey {
        match self {
            HdNode::Private(xpriv) => {
                CompressedPublicKey(Xpub::from_priv(&Secp256k1::new(), xpriv).public_key)
            }
            HdNode::Public(xpub) => CompressedPublicKey(xpub.public_key),
        }
    }

    /// Derive the descendant at `path` relative to this node.
    pub fn derive(&self, path: &[ChildNumber]) -> Result<HdNode, BitcoinishError> {
        if self.depth() as usize + path.len() > MAX_DEPTH {
            return Err(BitcoinishError::DerivationOverflow(format!(
                "depth {} + {} segments exceeds {MAX_DEPTH}",
                self.depth(),
                path.len()
            )));
        }
        let path = path.to_vec();
        match self {
            HdNode::Private(xpriv) => xpriv
                .derive_priv(&Secp256k1::new(), &path)
                .map(HdNode::Private)
                .map_err(|e| BitcoinishError::DerivationOverflow(e.to_string())),
            HdNode::Public(xpub) => xpub
                .derive_pub(&Secp256k1::new(), &path)
                .map(HdNode::Public)
                .map_err(|e| BitcoinishError::InvalidKey(format!("public derivation failed: {e}"))),
        }
    }
}

/// Resolve `key` to the node at `path`.
///
/// `key` may be the root or any ancestor-or-self of the target: the first
/// `depth(key)` segments of `path` are taken as already applied. The result
/// is identical whichever starting depth is used.
pub fn derive_hd_node(
    key: &str,
    path: &str,
    profile: &NetworkProfile,
) -> Result<HdNode, BitcoinishError> {
    let node = HdNode::from_base58(key, profile)?;
    let path = parse_derivation_path(path)?;
    let depth = node.depth() as usize;

    if depth > path.len() {
        return Err(BitcoinishError::InvalidPath(format!(
            "key depth {depth} is deeper than the {}-segment path",
            path.len()
        )));
    }
    if depth > 0 && node.child_number() != path[depth - 1] {
        return Err(BitcoinishError::InvalidPath(format!(
            "key was derived at child {}, path expects {}",
            node.child_number(),
            path[depth - 1]
        )));
    }

    node.derive(&path[depth..])
}

/// A derived key pair. The private half is absent when derived from an xpub
/// and is zeroized on drop otherwise.
pub struct KeyPair {
    pub public_key: CompressedPublicKey,
    pub private_key: Option<[u8; 32]>,
}

impl KeyPair {
    pub fn secret_key(&self) -> Result<SecretKey, BitcoinishError> {
        let bytes = self
            .private_key
            .as_ref()
            .ok_or_else(|| BitcoinishError::InvalidKey("key pair has no private key".into()))?;
        SecretKey::from_slice(bytes).map_err(|e| BitcoinishError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Derive the key pair at `0/index` below `node`.
pub fn derive_key_pair(node: &HdNode, index: u32) -> Result<KeyPair, BitcoinishError> {
    if index > MAX_CHILD_INDEX {
        return Err(BitcoinishError::DerivationOverflow(format!(
            "address index {index} exceeds {MAX_CHILD_INDEX}"
        )));
    }
    let child = node.derive(&[child_number(0, false)?, child_number(index, false)?])?;

    Ok(match &child {
        HdNode::Private(xpriv) => KeyPair {
            public_key: child.public_key(),
            private_key: Some(xpriv.private_key.secret_bytes()),
        },
        HdNode::Public(xpub) => KeyPair {
            public_key: CompressedPublicKey(xpub.public_key),
            private_key: None,
        },
    })
}

/// Address of the key at `0/index` below `node`.
pub fn derive_address(
    node: &HdNode,
    index: u32,
    profile: &NetworkProfile,
    address_type: AddressType,
) -> Result<String, BitcoinishError> {
    let key_pair = derive_key_pair(node, index)?;
    public_key_to_address(&key_pair.public_key.0.serialize(), profile, address_type)
}

/// WIF-encoded (compressed) private key at `0/index` below `node`.
pub fn derive_private_key(
    node: &HdNode,
    index: u32,
    profile: &NetworkProfile,
) -> Result<String, BitcoinishError> {
    let key_pair = derive_key_pair(node, index)?;
    let secret = key_pair
        .private_key
        .as_ref()
        .ok_or_else(|| BitcoinishError::InvalidKey("cannot derive a private key from an xpub".into()))?;

    let mut payload = [0u8; 33];
    payload[..32].copy_from_slice(secret);
    payload[32] = 0x01;
    let wif = bs58::encode(&payload[..])
        .with_check_version(profile.wif_version)
        .into_string();
    payload.zeroize();
    Ok(wif)
}

/// Convert an extended private key into the extended public key at `path`.
pub fn xprv_to_xpub(
    key: &str,
    path: &str,
    profile: &NetworkProfile,
) -> Result<String, BitcoinishError> {
    let node = derive_hd_node(key, path, profile)?;
    Ok(node.to_public().to_base58(profile))
}

pub fn is_valid_xprv(key: &str, profile: &NetworkProfile) -> bool {
    matches!(HdNode::from_base58(key, profile), Ok(HdNode::Private(_)))
}

pub fn is_valid_xpub(key: &str, profile: &NetworkProfile) -> bool {
    matches!(HdNode::from_base58(key, profile), Ok(HdNode::Public(_)))
}
