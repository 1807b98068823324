//! Unspent outputs owned by the wallet

use crate::address::Address;
use crate::address_book::AddressId;
use crate::keys::KeyPath;
use crate::script::Script;
use crate::transaction::OutPoint;
use serde::{Deserialize, Serialize};

/// Verification state of an unspent output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UtxoStatus {
    /// Inclusion proof verified against the active chain at `height`
    Confirmed {
        /// Block height of the containing block
        height: u32,
    },
    /// Seen in the mempool; no inclusion proof yet
    Unconfirmed,
    /// Was confirmed at `height`, but that height moved to another branch
    PendingReverification {
        /// Height the output was last verified at
        height: u32,
    },
}

impl UtxoStatus {
    /// Confirmation height, if verified
    pub fn confirmed_height(&self) -> Option<u32> {
        match self {
            UtxoStatus::Confirmed { height } => Some(*height),
            _ => None,
        }
    }

    /// Whether this output may be selected for spending. Only outputs with
    /// a verified inclusion proof qualify.
    pub fn is_spendable(&self) -> bool {
        matches!(self, UtxoStatus::Confirmed { .. })
    }
}

/// An output the wallet can spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Output reference
    pub outpoint: OutPoint,
    /// Amount in base units
    pub value: u64,
    /// Locking script of the output
    pub script_pubkey: Script,
    /// Owning address
    pub address: Address,
    /// Address table entry, if the address is one of ours
    pub address_id: Option<AddressId>,
    /// Derivation path of the owning key, if known
    pub path: Option<KeyPath>,
    /// Verification state
    pub status: UtxoStatus,
}

impl Utxo {
    /// Number of confirmations at chain height `tip`
    pub fn confirmations(&self, tip: u32) -> u32 {
        match self.status {
            UtxoStatus::Confirmed { height } if tip >= height => tip - height + 1,
            _ => 0,
        }
    }
}

// Test helpers
#[cfg(any(test, feature = "test-helpers"))]
impl Utxo {
    /// Confirmed output paying the receiving key at `index` (for testing only)
    pub fn test_owned(keys: &crate::keys::KeyChain, index: u32, value: u64, height: u32) -> Self {
        let pair = keys
            .derive_address_key(crate::address::AddressRole::Receiving, index)
            .expect("test key derivation");
        let address = Address::from_public_key(&pair.public_key_bytes());
        let mut tag = index.to_le_bytes().to_vec();
        tag.extend_from_slice(&value.to_le_bytes());
        Utxo {
            outpoint: OutPoint::new(crate::hash::Hash256::digest(&tag), index),
            value,
            script_pubkey: address.script_pubkey(),
            address,
            address_id: None,
            path: Some(pair.path().clone()),
            status: UtxoStatus::Confirmed { height },
        }
    }
}
