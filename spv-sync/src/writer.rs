//! The single writer of the UTXO set
//!
//! Address tasks verify independently and send [`AddressEvent`]s over a
//! channel; one [`StoreWriter`] drains it and applies each event whole.
//! The writer alone borrows the address book, so used-address discovery
//! and gap extension happen in event order.

use crate::store::{HistoryItem, Owner, UtxoStore};
use crate::Result;
use spv_core::{Address, AddressBook, AddressId, KeyChain, Script, Transaction, UtxoStatus};
use tracing::{debug, info};

/// Verified result of an address task
#[derive(Debug, Clone)]
pub enum AddressEvent {
    /// History as the server reported it
    History {
        /// Script hash
        script_hash: String,
        /// Entries, in server order
        items: Vec<HistoryItem>,
    },
    /// A transaction whose inclusion proof verified at `height`
    Verified {
        /// The transaction, checked against its txid
        tx: Transaction,
        /// Block height
        height: u32,
    },
    /// A mempool transaction
    Unconfirmed {
        /// The transaction, checked against its txid
        tx: Transaction,
    },
}

/// Applies address events to the UTXO set
pub struct StoreWriter<'a> {
    store: &'a UtxoStore,
    book: &'a mut AddressBook,
    keys: &'a KeyChain,
    derived: Vec<AddressId>,
    verified: usize,
}

impl<'a> StoreWriter<'a> {
    /// Writer over `store`, discovering addresses in `book`
    pub fn new(store: &'a UtxoStore, book: &'a mut AddressBook, keys: &'a KeyChain) -> Self {
        Self {
            store,
            book,
            keys,
            derived: Vec::new(),
            verified: 0,
        }
    }

    /// Apply one event
    pub fn apply(&mut self, event: AddressEvent) -> Result<()> {
        match event {
            AddressEvent::History { script_hash, items } => {
                if !items.is_empty() {
                    let id = self.book.find_script_hash(&script_hash).map(|e| e.id);
                    if let Some(id) = id {
                        self.mark_used(id)?;
                    }
                }
                let dropped = self
                    .store
                    .write(|set| set.record_history(&script_hash, items));
                for txid in dropped {
                    self.store.write(|set| set.forget_unconfirmed(&txid));
                }
            }
            AddressEvent::Verified { tx, height } => {
                self.apply_tx(&tx, UtxoStatus::Confirmed { height })?;
                self.verified += 1;
            }
            AddressEvent::Unconfirmed { tx } => {
                self.apply_tx(&tx, UtxoStatus::Unconfirmed)?;
            }
        }
        Ok(())
    }

    fn apply_tx(&mut self, tx: &Transaction, status: UtxoStatus) -> Result<()> {
        let book = &*self.book;
        let applied = self
            .store
            .write(|set| set.apply(tx, status, |script| owner_of(book, script)));
        debug!(
            txid = %tx.txid(),
            ?status,
            received = applied.received.len(),
            spent = applied.spent.len(),
            "Applied transaction"
        );
        for id in applied.addresses {
            self.mark_used(id)?;
        }
        Ok(())
    }

    fn mark_used(&mut self, id: AddressId) -> Result<()> {
        let added = self.book.mark_used(id, self.keys)?;
        if !added.is_empty() {
            info!(count = added.len(), "Extended address window after activity");
        }
        self.derived.extend(added);
        Ok(())
    }

    /// Summarize what was written
    pub fn finish(self) -> Written {
        let derived = self
            .derived
            .iter()
            .filter_map(|id| self.book.get(*id))
            .map(|e| e.address.script_hash())
            .collect();
        Written {
            derived,
            verified: self.verified,
        }
    }
}

/// Summary of one writer's work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Written {
    /// Script hashes of addresses derived while applying, to sync next
    pub derived: Vec<String>,
    /// Verified transactions applied
    pub verified: usize,
}

/// Wallet owner of an output script
pub fn owner_of(book: &AddressBook, script: &Script) -> Option<Owner> {
    let address = Address::from_script(script)?;
    let entry = book.find_address(&address)?;
    Some(Owner {
        address,
        address_id: entry.id,
        path: entry.path.clone(),
    })
}
