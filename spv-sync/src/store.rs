//! Wallet UTXO set and transaction cache
//!
//! [`UtxoSet`] is plain data. [`UtxoStore`] shares it: any number of
//! readers take consistent snapshots, while mutation is reserved for the
//! synchronizer's writer, which applies one fully verified transaction at
//! a time.
//!
//! A spend moves an output out of the set only once both the output and
//! the spending transaction are confirmed. Until then the spender is
//! remembered: against an existing output it locks that output, against
//! an output not yet verified it waits for the output to arrive.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spv_core::{Address, AddressId, Hash256, KeyPath, OutPoint, Script, Transaction, Utxo, UtxoStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A wallet transaction and its verification state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Transaction id
    pub txid: Hash256,
    /// Verification state
    pub state: UtxoStatus,
    /// Wallet outputs the transaction created
    pub received: Vec<OutPoint>,
    /// Every outpoint the transaction spends
    pub inputs: Vec<OutPoint>,
}

/// An output consumed by a confirmed spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentOutput {
    /// The output as it was before being spent
    pub utxo: Utxo,
    /// Spending transaction
    pub spender: Hash256,
}

/// A history entry as last reported by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Transaction id
    pub txid: Hash256,
    /// Reported height; zero or negative for mempool
    pub height: i64,
}

/// Wallet balance by verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    /// Outputs with a verified inclusion proof
    pub confirmed: u64,
    /// Mempool outputs
    pub unconfirmed: u64,
    /// Outputs whose block left the active chain
    pub pending_reverification: u64,
}

impl Balance {
    /// Sum of every state
    pub fn total(&self) -> u64 {
        self.confirmed
            .saturating_add(self.unconfirmed)
            .saturating_add(self.pending_reverification)
    }
}

/// Wallet ownership of an output script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Owning address
    pub address: Address,
    /// Address table id
    pub address_id: AddressId,
    /// Derivation path of the owning key
    pub path: KeyPath,
}

/// What applying one transaction changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Wallet outputs created or updated
    pub received: Vec<OutPoint>,
    /// Addresses that received funds
    pub addresses: Vec<AddressId>,
    /// Outputs moved out of the set
    pub spent: Vec<OutPoint>,
}

/// What a reorg invalidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorgImpact {
    /// Outputs now pending reverification
    pub utxos: usize,
    /// Transactions now pending reverification
    pub transactions: usize,
    /// Spent outputs returned to the set because their spender is in doubt
    pub reopened: usize,
}

/// UTXO set, spends and the per-address history cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UtxoSetState", into = "UtxoSetState")]
pub struct UtxoSet {
    utxos: BTreeMap<OutPoint, Utxo>,
    spent: BTreeMap<OutPoint, SpentOutput>,
    /// Spenders not yet applied: locks on held outputs, or waits for missing ones
    spenders: BTreeMap<OutPoint, Hash256>,
    transactions: BTreeMap<Hash256, TxRecord>,
    history: BTreeMap<String, Vec<HistoryItem>>,
    verified_height: u32,
}

/// Serialized form with sequences in place of struct-keyed maps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UtxoSetState {
    utxos: Vec<Utxo>,
    spent: Vec<SpentOutput>,
    spenders: Vec<(OutPoint, Hash256)>,
    transactions: Vec<TxRecord>,
    history: BTreeMap<String, Vec<HistoryItem>>,
    verified_height: u32,
}

impl From<UtxoSetState> for UtxoSet {
    fn from(state: UtxoSetState) -> Self {
        Self {
            utxos: state.utxos.into_iter().map(|u| (u.outpoint, u)).collect(),
            spent: state
                .spent
                .into_iter()
                .map(|s| (s.utxo.outpoint, s))
                .collect(),
            spenders: state.spenders.into_iter().collect(),
            transactions: state
                .transactions
                .into_iter()
                .map(|t| (t.txid, t))
                .collect(),
            history: state.history,
            verified_height: state.verified_height,
        }
    }
}

impl From<UtxoSet> for UtxoSetState {
    fn from(set: UtxoSet) -> Self {
        Self {
            utxos: set.utxos.into_values().collect(),
            spent: set.spent.into_values().collect(),
            spenders: set.spenders.into_iter().collect(),
            transactions: set.transactions.into_values().collect(),
            history: set.history,
            verified_height: set.verified_height,
        }
    }
}

impl UtxoSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Every unspent wallet output
    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    /// Output by outpoint
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Number of unspent outputs
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    /// Whether there are no unspent outputs
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Whether a known but unconfirmed transaction spends `outpoint`
    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint) && self.spenders.contains_key(outpoint)
    }

    /// Outputs that may fund a new transaction.
    ///
    /// Excludes outputs pending reverification and outputs already spent by
    /// a transaction in the mempool.
    pub fn spendable(&self) -> Vec<Utxo> {
        self.utxos
            .values()
            .filter(|u| u.status.is_spendable() && !self.spenders.contains_key(&u.outpoint))
            .cloned()
            .collect()
    }

    /// Balance by verification state; locked outputs are not counted
    pub fn balance(&self) -> Balance {
        let mut balance = Balance::default();
        for utxo in self.utxos.values() {
            if self.spenders.contains_key(&utxo.outpoint) {
                continue;
            }
            let bucket = match utxo.status {
                UtxoStatus::Confirmed { .. } => &mut balance.confirmed,
                UtxoStatus::Unconfirmed => &mut balance.unconfirmed,
                UtxoStatus::PendingReverification { .. } => &mut balance.pending_reverification,
            };
            *bucket = bucket.saturating_add(utxo.value);
        }
        balance
    }

    /// Output consumed by a confirmed spend
    pub fn spent(&self, outpoint: &OutPoint) -> Option<&SpentOutput> {
        self.spent.get(outpoint)
    }

    /// Wallet transaction by id
    pub fn transaction(&self, txid: &Hash256) -> Option<&TxRecord> {
        self.transactions.get(txid)
    }

    /// Every wallet transaction
    pub fn transactions(&self) -> impl Iterator<Item = &TxRecord> {
        self.transactions.values()
    }

    /// Height a transaction was verified at, if it is currently confirmed
    pub fn verified_at(&self, txid: &Hash256) -> Option<u32> {
        self.transactions
            .get(txid)
            .and_then(|t| t.state.confirmed_height())
    }

    /// Cached history of a script hash
    pub fn history(&self, script_hash: &str) -> &[HistoryItem] {
        self.history
            .get(script_hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Chain height at which every address was last fully verified
    pub fn verified_height(&self) -> u32 {
        self.verified_height
    }

    pub(crate) fn set_verified_height(&mut self, height: u32) {
        self.verified_height = height;
    }

    /// Replace the history of a script hash.
    ///
    /// Returns the transactions that were listed before but no longer are.
    pub(crate) fn record_history(&mut self, script_hash: &str, items: Vec<HistoryItem>) -> Vec<Hash256> {
        let now: BTreeSet<Hash256> = items.iter().map(|i| i.txid).collect();
        let dropped = self
            .history(script_hash)
            .iter()
            .map(|i| i.txid)
            .filter(|txid| !now.contains(txid))
            .collect();
        self.history.insert(script_hash.to_string(), items);
        dropped
    }

    /// Apply a verified or mempool transaction.
    ///
    /// `owner` recognises wallet scripts. Re-applying a transaction updates
    /// its state; a confirmed transaction is never downgraded to mempool.
    pub(crate) fn apply(
        &mut self,
        tx: &Transaction,
        status: UtxoStatus,
        owner: impl Fn(&Script) -> Option<Owner>,
    ) -> Applied {
        let txid = tx.txid();
        let inputs: Vec<OutPoint> = if tx.is_coinbase() {
            Vec::new()
        } else {
            tx.inputs.iter().map(|i| i.previous_output).collect()
        };
        let record = self.transactions.entry(txid).or_insert_with(|| TxRecord {
            txid,
            state: status,
            received: Vec::new(),
            inputs: inputs.clone(),
        });
        let status = merge_status(record.state, status);
        record.state = status;

        let mut applied = Applied::default();
        for (vout, output) in tx.outputs.iter().enumerate() {
            let Some(owner) = owner(&output.script_pubkey) else {
                continue;
            };
            let outpoint = OutPoint::new(txid, vout as u32);
            if let Some(spent) = self.spent.get_mut(&outpoint) {
                spent.utxo.status = status;
                continue;
            }
            self.utxos
                .entry(outpoint)
                .and_modify(|u| u.status = merge_status(u.status, status))
                .or_insert_with(|| Utxo {
                    outpoint,
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    address: owner.address,
                    address_id: Some(owner.address_id),
                    path: Some(owner.path),
                    status,
                });
            if let Some(record) = self.transactions.get_mut(&txid) {
                if !record.received.contains(&outpoint) {
                    record.received.push(outpoint);
                }
            }
            applied.received.push(outpoint);
            if !applied.addresses.contains(&owner.address_id) {
                applied.addresses.push(owner.address_id);
            }
        }

        // Spenders seen before this output were not kept in the map
        for outpoint in &applied.received {
            if !self.spenders.contains_key(outpoint) {
                if let Some(spender) = self.recorded_spender(outpoint) {
                    self.spenders.insert(*outpoint, spender);
                }
            }
        }

        for outpoint in &inputs {
            if self.spent.get(outpoint).is_some_and(|s| s.spender == txid) {
                continue;
            }
            self.spenders.insert(*outpoint, txid);
        }

        // Settle after recording spenders so a transaction spending its own
        // wallet output resolves in one pass
        for outpoint in applied.received.iter().chain(inputs.iter()) {
            if self.settle(outpoint) {
                applied.spent.push(*outpoint);
            }
        }

        // A confirmed spend of an output the wallet does not hold locks
        // nothing; the record's inputs still find it if the output arrives
        if status.confirmed_height().is_some() {
            for outpoint in &inputs {
                if !self.utxos.contains_key(outpoint) && self.spenders.get(outpoint) == Some(&txid) {
                    self.spenders.remove(outpoint);
                }
            }
        }
        applied
    }

    fn recorded_spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.transactions
            .values()
            .find(|record| record.inputs.contains(outpoint))
            .map(|record| record.txid)
    }

    /// Complete a recorded spend once both sides are confirmed
    fn settle(&mut self, outpoint: &OutPoint) -> bool {
        let Some(spender) = self.spenders.get(outpoint).copied() else {
            return false;
        };
        let spender_confirmed = self
            .transactions
            .get(&spender)
            .is_some_and(|t| t.state.confirmed_height().is_some());
        let output_confirmed = self
            .utxos
            .get(outpoint)
            .is_some_and(|u| u.status.confirmed_height().is_some());
        if !(spender_confirmed && output_confirmed) {
            return false;
        }
        self.spenders.remove(outpoint);
        match self.utxos.remove(outpoint) {
            Some(utxo) => {
                self.spent.insert(*outpoint, SpentOutput { utxo, spender });
                true
            }
            None => false,
        }
    }

    /// Drop a mempool transaction the server no longer reports.
    ///
    /// Confirmed and pending transactions are kept. Returns whether
    /// anything was removed.
    pub(crate) fn forget_unconfirmed(&mut self, txid: &Hash256) -> bool {
        let is_mempool = self
            .transactions
            .get(txid)
            .is_some_and(|t| t.state == UtxoStatus::Unconfirmed);
        if !is_mempool {
            return false;
        }
        let Some(record) = self.transactions.remove(txid) else {
            return false;
        };
        for outpoint in &record.received {
            self.utxos.remove(outpoint);
            self.spenders.remove(outpoint);
        }
        for outpoint in &record.inputs {
            if self.spenders.get(outpoint) == Some(txid) {
                self.spenders.remove(outpoint);
            }
        }
        tracing::info!(txid = %txid, "Dropped mempool transaction");
        true
    }

    /// Invalidate everything confirmed above `fork_height`.
    ///
    /// Outputs and transactions become pending reverification. Outputs spent
    /// by a transaction above the fork return to the set, locked by that
    /// spender until it verifies again.
    pub(crate) fn mark_reorg(&mut self, fork_height: u32) -> ReorgImpact {
        let mut impact = ReorgImpact::default();
        let demote = |status: &mut UtxoStatus| match *status {
            UtxoStatus::Confirmed { height } if height > fork_height => {
                *status = UtxoStatus::PendingReverification { height };
                true
            }
            _ => false,
        };

        for record in self.transactions.values_mut() {
            if demote(&mut record.state) {
                impact.transactions += 1;
            }
        }
        for utxo in self.utxos.values_mut() {
            if demote(&mut utxo.status) {
                impact.utxos += 1;
            }
        }

        let reopened: Vec<OutPoint> = self
            .spent
            .iter()
            .filter(|(_, s)| {
                self.transactions
                    .get(&s.spender)
                    .map_or(true, |t| t.state.confirmed_height().is_none())
            })
            .map(|(outpoint, _)| *outpoint)
            .collect();
        for outpoint in reopened {
            if let Some(mut spent) = self.spent.remove(&outpoint) {
                demote(&mut spent.utxo.status);
                self.spenders.insert(outpoint, spent.spender);
                self.utxos.insert(outpoint, spent.utxo);
                impact.reopened += 1;
            }
        }

        self.verified_height = self.verified_height.min(fork_height);
        impact
    }
}

fn merge_status(existing: UtxoStatus, incoming: UtxoStatus) -> UtxoStatus {
    match (existing, incoming) {
        (UtxoStatus::Confirmed { .. }, UtxoStatus::Unconfirmed) => existing,
        _ => incoming,
    }
}

/// Shared handle to the wallet's UTXO set
#[derive(Debug, Clone, Default)]
pub struct UtxoStore {
    inner: Arc<RwLock<UtxoSet>>,
}

impl UtxoStore {
    /// Store holding `set`
    pub fn new(set: UtxoSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(set)),
        }
    }

    /// Consistent copy of the whole set
    pub fn snapshot(&self) -> UtxoSet {
        self.inner.read().clone()
    }

    /// Read under the lock without copying
    pub fn read<R>(&self, f: impl FnOnce(&UtxoSet) -> R) -> R {
        f(&self.inner.read())
    }

    /// Current balance
    pub fn balance(&self) -> Balance {
        self.read(UtxoSet::balance)
    }

    /// Outputs that may fund a new transaction
    pub fn spendable(&self) -> Vec<Utxo> {
        self.read(UtxoSet::spendable)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut UtxoSet) -> R) -> R {
        f(&mut self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spv_core::{TxIn, TxOut};

    fn ours() -> Address {
        Address::P2pkh([7u8; 20])
    }

    fn owner(script: &Script) -> Option<Owner> {
        (Address::from_script(script) == Some(ours())).then(|| Owner {
            address: ours(),
            address_id: AddressId(0),
            path: KeyPath::master(),
        })
    }

    fn funding(tag: u8, value: u64) -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxIn::new(OutPoint::new(Hash256::digest(&[tag]), 0)));
        tx.outputs.push(TxOut {
            value,
            script_pubkey: ours().script_pubkey(),
        });
        tx
    }

    fn spending(outpoint: OutPoint, value: u64) -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxIn::new(outpoint));
        tx.outputs.push(TxOut {
            value,
            script_pubkey: Address::P2pkh([9u8; 20]).script_pubkey(),
        });
        tx
    }

    #[test]
    fn test_confirmed_receive_and_spend() {
        let mut set = UtxoSet::new();
        let fund = funding(1, 50_000);
        let applied = set.apply(&fund, UtxoStatus::Confirmed { height: 5 }, owner);
        assert_eq!(applied.received.len(), 1);
        assert_eq!(set.balance().confirmed, 50_000);

        let outpoint = OutPoint::new(fund.txid(), 0);
        let spend = spending(outpoint, 40_000);
        let applied = set.apply(&spend, UtxoStatus::Confirmed { height: 6 }, owner);
        assert_eq!(applied.spent, vec![outpoint]);
        assert!(set.is_empty());
        assert_eq!(set.spent(&outpoint).unwrap().spender, spend.txid());
    }

    #[test]
    fn test_spend_waits_for_its_input() {
        let mut set = UtxoSet::new();
        let fund = funding(2, 10_000);
        let outpoint = OutPoint::new(fund.txid(), 0);
        let spend = spending(outpoint, 9_000);

        // Spend verified first: nothing to remove yet
        let applied = set.apply(&spend, UtxoStatus::Confirmed { height: 9 }, owner);
        assert!(applied.spent.is_empty());
        assert!(set.is_empty());

        let applied = set.apply(&fund, UtxoStatus::Confirmed { height: 8 }, owner);
        assert_eq!(applied.spent, vec![outpoint]);
        assert_eq!(set.balance(), Balance::default());
    }

    #[test]
    fn test_confirmed_foreign_inputs_not_kept() {
        let mut set = UtxoSet::new();
        let fund = funding(4, 10_000);
        set.apply(&fund, UtxoStatus::Confirmed { height: 4 }, owner);
        // The funding input belongs to someone else
        assert!(set.spenders.is_empty());

        let outpoint = OutPoint::new(fund.txid(), 0);
        let mut spend = spending(outpoint, 4_000);
        spend.inputs.push(TxIn::new(OutPoint::new(Hash256::digest(b"foreign"), 1)));
        set.apply(&spend, UtxoStatus::Unconfirmed, owner);
        assert_eq!(set.spenders.len(), 2);

        set.apply(&spend, UtxoStatus::Confirmed { height: 5 }, owner);
        assert!(set.spenders.is_empty());
        assert_eq!(set.spent(&outpoint).unwrap().spender, spend.txid());

        let state = UtxoSetState::from(set.clone());
        assert!(state.spenders.is_empty());
    }

    #[test]
    fn test_unconfirmed_funding_not_spendable() {
        let mut set = UtxoSet::new();
        let fund = funding(5, 30_000);
        set.apply(&fund, UtxoStatus::Unconfirmed, owner);
        assert_eq!(set.balance().unconfirmed, 30_000);
        assert!(set.spendable().is_empty());

        set.apply(&fund, UtxoStatus::Confirmed { height: 7 }, owner);
        assert_eq!(set.spendable().len(), 1);
    }

    #[test]
    fn test_mempool_spend_locks_output() {
        let mut set = UtxoSet::new();
        let fund = funding(3, 10_000);
        set.apply(&fund, UtxoStatus::Confirmed { height: 3 }, owner);
        let outpoint = OutPoint::new(fund.txid(), 0);
        let spend = spending(outpoint, 9_000);

        set.apply(&spend, UtxoStatus::Unconfirmed, owner);
        assert!(set.is_locked(&outpoint));
        assert!(set.spendable().is_empty());
        assert_eq!(set.balance().confirmed, 0);

        assert!(set.forget_unconfirmed(&spend.txid()));
        assert!(!set.is_locked(&outpoint));
        assert_eq!(set.balance().confirmed, 10_000);
    }

    #[test]
    fn test_reorg_marks_and_reopens() {
        let mut set = UtxoSet::new();
        let low = funding(4, 1_000);
        let high = funding(5, 2_000);
        set.apply(&low, UtxoStatus::Confirmed { height: 3 }, owner);
        set.apply(&high, UtxoStatus::Confirmed { height: 7 }, owner);
        let spent_outpoint = OutPoint::new(low.txid(), 0);
        set.apply(&spending(spent_outpoint, 900), UtxoStatus::Confirmed { height: 8 }, owner);
        set.set_verified_height(10);

        let impact = set.mark_reorg(5);
        assert_eq!(impact.utxos, 1);
        assert_eq!(impact.transactions, 2);
        assert_eq!(impact.reopened, 1);
        assert_eq!(set.verified_height(), 5);

        let high_outpoint = OutPoint::new(high.txid(), 0);
        assert_eq!(
            set.get(&high_outpoint).unwrap().status,
            UtxoStatus::PendingReverification { height: 7 }
        );
        // Back in the set but locked by its unverified spender
        assert!(set.is_locked(&spent_outpoint));
        assert_eq!(set.balance().pending_reverification, 2_000);
        assert!(set.spendable().is_empty());

        // Reverified on the new branch
        set.apply(&high, UtxoStatus::Confirmed { height: 9 }, owner);
        assert_eq!(
            set.get(&high_outpoint).unwrap().status,
            UtxoStatus::Confirmed { height: 9 }
        );
    }

    #[test]
    fn test_confirmed_not_downgraded() {
        let mut set = UtxoSet::new();
        let fund = funding(6, 5_000);
        set.apply(&fund, UtxoStatus::Confirmed { height: 2 }, owner);
        set.apply(&fund, UtxoStatus::Unconfirmed, owner);
        assert_eq!(set.verified_at(&fund.txid()), Some(2));
        assert!(!set.forget_unconfirmed(&fund.txid()));
    }

    #[test]
    fn test_history_reports_dropped() {
        let mut set = UtxoSet::new();
        let a = HistoryItem {
            txid: Hash256::digest(b"a"),
            height: 5,
        };
        let b = HistoryItem {
            txid: Hash256::digest(b"b"),
            height: 0,
        };
        assert!(set.record_history("sh", vec![a, b]).is_empty());
        assert_eq!(set.record_history("sh", vec![a]), vec![b.txid]);
        assert_eq!(set.history("sh"), &[a]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut set = UtxoSet::new();
        let fund = funding(7, 3_000);
        set.apply(&fund, UtxoStatus::Confirmed { height: 4 }, owner);
        set.apply(&spending(OutPoint::new(fund.txid(), 0), 2_000), UtxoStatus::Unconfirmed, owner);
        set.record_history("sh", vec![HistoryItem { txid: fund.txid(), height: 4 }]);

        let json = serde_json::to_string(&set).unwrap();
        let back: UtxoSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    fn chained(from: OutPoint, keep: u64, pay: u64) -> Transaction {
        let mut tx = spending(from, pay);
        tx.outputs.push(TxOut {
            value: keep,
            script_pubkey: ours().script_pubkey(),
        });
        tx
    }

    proptest! {
        #[test]
        fn prop_apply_order_does_not_matter(order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
            let fund = funding(8, 10_000);
            let first = chained(OutPoint::new(fund.txid(), 0), 8_000, 1_500);
            let second = chained(OutPoint::new(first.txid(), 1), 5_000, 2_500);
            let txs = [(&fund, 1), (&first, 2), (&second, 3)];

            let mut set = UtxoSet::new();
            for index in order {
                let (tx, height) = txs[index];
                set.apply(tx, UtxoStatus::Confirmed { height }, owner);
            }
            prop_assert_eq!(set.len(), 1);
            prop_assert!(set.get(&OutPoint::new(second.txid(), 1)).is_some());
            prop_assert_eq!(set.balance().confirmed, 5_000);
        }
    }
}
