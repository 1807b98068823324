//! Addresses and their capability interface
//!
//! Address kinds are a tagged variant rather than a type hierarchy; each kind
//! knows its locking script template and its input size for fee estimation.

use crate::hash::{hash160, sha256, sha256d};
use crate::script::Script;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use spv_params::Network;
use std::fmt;

/// Whether an address receives external payments or change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressRole {
    /// Handed out to payers
    Receiving,
    /// Used for the wallet's own change outputs
    Change,
}

impl AddressRole {
    /// BIP-44 chain index of this role
    pub const fn chain_index(&self) -> u32 {
        match self {
            AddressRole::Receiving => 0,
            AddressRole::Change => 1,
        }
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressRole::Receiving => f.write_str("receiving"),
            AddressRole::Change => f.write_str("change"),
        }
    }
}

/// A payment destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "hash", rename_all = "lowercase")]
pub enum Address {
    /// Pay to public key hash
    P2pkh(#[serde(with = "hex20")] [u8; 20]),
    /// Pay to script hash
    P2sh(#[serde(with = "hex20")] [u8; 20]),
}

impl Address {
    /// P2PKH address of a compressed public key
    pub fn from_public_key(public_key: &[u8; 33]) -> Self {
        Address::P2pkh(hash160(public_key))
    }

    /// P2SH address of a redeem script
    pub fn from_redeem_script(script: &Script) -> Self {
        Address::P2sh(hash160(script.as_bytes()))
    }

    /// Recognise a standard locking script
    pub fn from_script(script: &Script) -> Option<Self> {
        if let Some(hash) = script.p2pkh_hash() {
            return Some(Address::P2pkh(hash));
        }
        script.p2sh_hash().map(Address::P2sh)
    }

    /// Locking script paying to this address
    pub fn script_pubkey(&self) -> Script {
        match self {
            Address::P2pkh(hash) => Script::p2pkh(hash),
            Address::P2sh(hash) => Script::p2sh(hash),
        }
    }

    /// Server subscription key: SHA-256 of the locking script, reversed, hex
    pub fn script_hash(&self) -> String {
        let mut digest = sha256(self.script_pubkey().as_bytes());
        digest.reverse();
        hex::encode(digest)
    }

    /// Serialized size of an input spending this address, for fee estimation
    pub fn input_size_estimate(&self) -> usize {
        match self {
            // outpoint 36 + script len 1 + sig push 73 + pubkey push 34 + sequence 4
            Address::P2pkh(_) => 148,
            // Redeem script unknown; assume a 2-of-3 multisig
            Address::P2sh(_) => 297,
        }
    }

    /// Whether the wallet can produce a signature for this kind
    pub fn is_signable(&self) -> bool {
        matches!(self, Address::P2pkh(_))
    }

    /// Base58Check encoding for `network`
    pub fn encode(&self, network: &Network) -> String {
        let (version, hash) = match self {
            Address::P2pkh(h) => (network.p2pkh_version, h),
            Address::P2sh(h) => (network.p2sh_version, h),
        };
        let mut payload = Vec::with_capacity(25);
        payload.push(version);
        payload.extend_from_slice(hash);
        let checksum = sha256d(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload).into_string()
    }

    /// Decode a Base58Check address, checking it belongs to `network`
    pub fn decode(s: &str, network: &Network) -> Result<Self> {
        let data = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::InvalidAddress(format!("{s}: {e}")))?;
        if data.len() != 25 {
            return Err(Error::InvalidAddress(format!("{s}: wrong length {}", data.len())));
        }
        let (payload, checksum) = data.split_at(21);
        if sha256d(payload)[..4] != *checksum {
            return Err(Error::InvalidAddress(format!("{s}: bad checksum")));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        match payload[0] {
            v if v == network.p2pkh_version => Ok(Address::P2pkh(hash)),
            v if v == network.p2sh_version => Ok(Address::P2sh(hash)),
            v => Err(Error::InvalidAddress(format!(
                "{s}: version byte {v:#04x} is not valid on {}",
                network.name
            ))),
        }
    }
}

mod hex20 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 20], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 20 bytes"))
    }
}
