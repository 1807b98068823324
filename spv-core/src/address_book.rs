//! Derived address table with gap-limit look-ahead
//!
//! Addresses live in an arena indexed by [`AddressId`]; UTXOs and history
//! entries refer to them by id. For each role the book keeps at least
//! `gap_limit` unused addresses derived past the highest used index, so
//! payments to addresses not yet handed out are still discovered.

use crate::address::{Address, AddressRole};
use crate::keys::{KeyChain, KeyPath};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default gap limit for receiving addresses
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Default gap limit for change addresses
pub const DEFAULT_CHANGE_GAP_LIMIT: u32 = 6;

/// Stable index of an address in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressId(pub u32);

/// One derived address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Arena id
    pub id: AddressId,
    /// Receiving or change
    pub role: AddressRole,
    /// Index within the role's chain
    pub index: u32,
    /// Full derivation path
    pub path: KeyPath,
    /// The address
    pub address: Address,
    /// Observed with on-chain or mempool activity
    pub used: bool,
    /// Times handed out through `next_unused`
    pub share_count: u32,
    /// Optional label
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RoleChain {
    derived: u32,
    highest_used: Option<u32>,
    gap_limit: u32,
}

impl RoleChain {
    fn new(gap_limit: u32) -> Self {
        Self {
            derived: 0,
            highest_used: None,
            gap_limit,
        }
    }

    /// Number of addresses that must exist for the gap to hold
    fn required(&self) -> u32 {
        let base = self.highest_used.map(|h| h.saturating_add(1)).unwrap_or(0);
        base.saturating_add(self.gap_limit.max(1))
    }
}

/// Serializable address book state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookState {
    /// Every derived address, in id order
    pub entries: Vec<AddressEntry>,
    /// Receiving gap limit
    pub receiving_gap_limit: u32,
    /// Change gap limit
    pub change_gap_limit: u32,
}

/// Address table for one key chain
#[derive(Debug, Clone)]
pub struct AddressBook {
    entries: Vec<AddressEntry>,
    by_address: HashMap<Address, AddressId>,
    by_script_hash: HashMap<String, AddressId>,
    receiving: RoleChain,
    change: RoleChain,
}

impl AddressBook {
    /// Create an empty book with the given gap limits
    pub fn new(receiving_gap_limit: u32, change_gap_limit: u32) -> Self {
        Self {
            entries: Vec::new(),
            by_address: HashMap::new(),
            by_script_hash: HashMap::new(),
            receiving: RoleChain::new(receiving_gap_limit),
            change: RoleChain::new(change_gap_limit),
        }
    }

    /// Restore from persisted state
    pub fn restore(state: AddressBookState) -> Result<Self> {
        let mut book = Self::new(state.receiving_gap_limit, state.change_gap_limit);
        for (i, entry) in state.entries.into_iter().enumerate() {
            if entry.id.0 as usize != i {
                return Err(Error::InvalidKey(format!(
                    "address book entry {} stored at position {}",
                    entry.id.0, i
                )));
            }
            let chain = book.chain_mut(entry.role);
            if entry.index != chain.derived {
                return Err(Error::InvalidKey(format!(
                    "{} chain has a hole at index {}",
                    entry.role, chain.derived
                )));
            }
            chain.derived += 1;
            if entry.used {
                chain.highest_used = Some(chain.highest_used.map_or(entry.index, |h| h.max(entry.index)));
            }
            book.index_entry(&entry);
            book.entries.push(entry);
        }
        Ok(book)
    }

    /// Persistable state
    pub fn state(&self) -> AddressBookState {
        AddressBookState {
            entries: self.entries.clone(),
            receiving_gap_limit: self.receiving.gap_limit,
            change_gap_limit: self.change.gap_limit,
        }
    }

    fn chain(&self, role: AddressRole) -> &RoleChain {
        match role {
            AddressRole::Receiving => &self.receiving,
            AddressRole::Change => &self.change,
        }
    }

    fn chain_mut(&mut self, role: AddressRole) -> &mut RoleChain {
        match role {
            AddressRole::Receiving => &mut self.receiving,
            AddressRole::Change => &mut self.change,
        }
    }

    fn index_entry(&mut self, entry: &AddressEntry) {
        self.by_address.insert(entry.address, entry.id);
        self.by_script_hash.insert(entry.address.script_hash(), entry.id);
    }

    fn derive_next(&mut self, role: AddressRole, keys: &KeyChain) -> Result<AddressId> {
        let index = self.chain(role).derived;
        let pair = keys.derive_address_key(role, index)?;
        let id = AddressId(self.entries.len() as u32);
        let entry = AddressEntry {
            id,
            role,
            index,
            path: pair.path().clone(),
            address: Address::from_public_key(&pair.public_key_bytes()),
            used: false,
            share_count: 0,
            label: None,
        };
        self.index_entry(&entry);
        self.entries.push(entry);
        self.chain_mut(role).derived += 1;
        Ok(id)
    }

    /// Derive addresses until both roles satisfy their gap limit.
    ///
    /// Returns the ids of newly derived addresses.
    pub fn ensure_gap(&mut self, keys: &KeyChain) -> Result<Vec<AddressId>> {
        let mut added = Vec::new();
        for role in [AddressRole::Receiving, AddressRole::Change] {
            while self.chain(role).derived < self.chain(role).required() {
                added.push(self.derive_next(role, keys)?);
            }
        }
        if !added.is_empty() {
            tracing::debug!("Derived {} look-ahead addresses", added.len());
        }
        Ok(added)
    }

    /// Lowest-index address of `role` not yet observed with activity
    pub fn next_unused(&mut self, role: AddressRole, keys: &KeyChain) -> Result<AddressEntry> {
        self.ensure_gap(keys)?;
        let found = self.peek_unused(role).map(|e| e.id);
        let id = match found {
            Some(id) => id,
            None => self.derive_next(role, keys)?,
        };
        let entry = &mut self.entries[id.0 as usize];
        entry.share_count += 1;
        tracing::info!("Handing out {} address index {}", role, entry.index);
        Ok(entry.clone())
    }

    /// Lowest-index unused address of `role` among those already derived,
    /// without counting it as handed out
    pub fn peek_unused(&self, role: AddressRole) -> Option<&AddressEntry> {
        self.entries
            .iter()
            .filter(|e| e.role == role && !e.used)
            .min_by_key(|e| e.index)
    }

    /// Count one more hand-out of an address
    pub fn record_share(&mut self, id: AddressId) {
        if let Some(entry) = self.entries.get_mut(id.0 as usize) {
            entry.share_count += 1;
        }
    }

    /// Record activity on an address and extend the look-ahead window.
    ///
    /// Returns ids of addresses derived to restore the gap.
    pub fn mark_used(&mut self, id: AddressId, keys: &KeyChain) -> Result<Vec<AddressId>> {
        let entry = self
            .entries
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::InvalidKey(format!("unknown address id {}", id.0)))?;
        if entry.used {
            return Ok(Vec::new());
        }
        entry.used = true;
        let (role, index) = (entry.role, entry.index);
        let chain = self.chain_mut(role);
        chain.highest_used = Some(chain.highest_used.map_or(index, |h| h.max(index)));
        self.ensure_gap(keys)
    }

    /// Set an address label
    pub fn set_label(&mut self, id: AddressId, label: String) {
        if let Some(entry) = self.entries.get_mut(id.0 as usize) {
            entry.label = Some(label);
        }
    }

    /// Entry by id
    pub fn get(&self, id: AddressId) -> Option<&AddressEntry> {
        self.entries.get(id.0 as usize)
    }

    /// Entry owning `address`
    pub fn find_address(&self, address: &Address) -> Option<&AddressEntry> {
        self.by_address.get(address).and_then(|id| self.get(*id))
    }

    /// Entry whose script hash is `script_hash`
    pub fn find_script_hash(&self, script_hash: &str) -> Option<&AddressEntry> {
        self.by_script_hash.get(script_hash).and_then(|id| self.get(*id))
    }

    /// Derivation path of a wallet address
    pub fn path_of(&self, address: &Address) -> Option<&KeyPath> {
        self.find_address(address).map(|e| &e.path)
    }

    /// All entries in id order
    pub fn entries(&self) -> &[AddressEntry] {
        &self.entries
    }

    /// Number of derived addresses of a role
    pub fn derived_count(&self, role: AddressRole) -> u32 {
        self.chain(role).derived
    }

    /// Highest used index of a role
    pub fn highest_used(&self, role: AddressRole) -> Option<u32> {
        self.chain(role).highest_used
    }

    /// Gap limit of a role
    pub fn gap_limit(&self, role: AddressRole) -> u32 {
        self.chain(role).gap_limit
    }

    /// Number of addresses
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no address has been derived
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_LIMIT, DEFAULT_CHANGE_GAP_LIMIT)
    }
}
