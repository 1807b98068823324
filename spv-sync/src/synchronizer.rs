//! Header and address synchronization
//!
//! A round first extends the header chain from the local tip, walking back
//! when a server's headers do not connect, and marks outputs above any
//! reorg's fork point as pending reverification. It then syncs every
//! watched address: fetch history, check each confirmed entry's merkle
//! proof against the active chain, fetch the raw transaction and check it
//! hashes to the txid, then hand it to the writer. Entries that keep
//! failing are re-queried after a delay and finally reported as warnings.

use crate::api::{ServerApi, ServerEvent};
use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::progress::{SyncProgress, SyncStage, SyncStatus, SyncWarning};
use crate::store::{HistoryItem, UtxoSet, UtxoStore};
use crate::writer::{AddressEvent, StoreWriter, Written};
use crate::{Error, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use spv_chain::{BlockHeader, ChainSnapshot, ChainUpdate, HeaderChain, MerkleProof};
use spv_core::{AddressBook, Hash256, KeyChain, SignedTransaction, Transaction, UtxoStatus};
use spv_net::{HistoryEntry, MerkleResponse};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Events buffered between address tasks and the writer
const EVENT_BUFFER: usize = 64;

/// Outcome of a sync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Local header height after the round
    pub headers_height: u32,
    /// Fork heights of reorgs seen during the round
    pub reorgs: Vec<u32>,
    /// Addresses synced without problems
    pub addresses_synced: usize,
    /// Transactions verified and applied
    pub transactions_verified: usize,
    /// Non-fatal problems
    pub warnings: Vec<SyncWarning>,
    /// Status at the end of the round
    pub status: SyncStatus,
}

/// Result of header sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSync {
    /// Local height afterwards
    pub height: u32,
    /// Headers that joined the tree
    pub connected: usize,
    /// Fork heights of reorgs
    pub reorgs: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressOutcome {
    Synced,
    Failed { unreachable: bool },
}

#[derive(Debug, Default)]
struct AddressRound {
    synced: usize,
    failed: usize,
    unreachable: usize,
    verified: usize,
}

/// Keeps headers and the UTXO set in step with the servers
pub struct Synchronizer {
    server: Arc<dyn ServerApi>,
    chain: Arc<RwLock<HeaderChain>>,
    store: UtxoStore,
    config: SyncConfig,
    progress: SyncProgress,
    cancel: CancelToken,
}

impl Synchronizer {
    /// Synchronizer over an existing chain and UTXO store
    pub fn new(
        server: Arc<dyn ServerApi>,
        chain: HeaderChain,
        store: UtxoStore,
        config: SyncConfig,
    ) -> Self {
        let verified = store.read(UtxoSet::verified_height);
        let progress = SyncProgress::resume(chain.height(), verified);
        Self {
            server,
            chain: Arc::new(RwLock::new(chain)),
            store,
            config,
            progress,
            cancel: CancelToken::new(),
        }
    }

    /// Same chain and store, served by `server`
    pub fn using_server(mut self, server: Arc<dyn ServerApi>) -> Self {
        self.server = server;
        self
    }

    /// Configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// UTXO store
    pub fn store(&self) -> &UtxoStore {
        &self.store
    }

    /// Progress tracker
    pub fn progress(&self) -> &SyncProgress {
        &self.progress
    }

    /// Token that stops a running round or watch loop
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Server operations
    pub fn server(&self) -> &Arc<dyn ServerApi> {
        &self.server
    }

    /// Read the header chain
    pub fn with_chain<R>(&self, f: impl FnOnce(&HeaderChain) -> R) -> R {
        f(&self.chain.read())
    }

    /// Height of the active header chain
    pub fn headers_height(&self) -> u32 {
        self.chain.read().height()
    }

    /// Active branch for persistence
    pub fn chain_snapshot(&self) -> ChainSnapshot {
        self.chain.read().export()
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        let mut status = self.progress.status();
        status.headers_height = self.headers_height();
        status
    }

    /// Run one full round: headers, then every address in `book`.
    ///
    /// Unreachable servers stall the round instead of failing it; only
    /// cancellation and local errors are returned as `Err`.
    pub async fn sync(&self, book: &mut AddressBook, keys: &KeyChain) -> Result<SyncReport> {
        self.progress.start();
        self.cancel.check()?;
        book.ensure_gap(keys)?;
        let mut report = SyncReport::default();

        match self.sync_headers().await {
            Ok(headers) => report.reorgs = headers.reorgs,
            Err(Error::Net(e)) => {
                self.progress.set_stalled(true);
                self.progress.warn(SyncWarning::HeadersUnavailable {
                    reason: e.to_string(),
                });
                return Ok(self.finish_round(report, false));
            }
            Err(e) => return Err(e),
        }

        let targets = watched(book);
        let round = self.sync_addresses(book, keys, targets).await?;
        report.addresses_synced = round.synced;
        report.transactions_verified = round.verified;
        if round.synced == 0 && round.failed > 0 && round.unreachable == round.failed {
            self.progress.set_stalled(true);
        }
        Ok(self.finish_round(report, round.failed == 0))
    }

    fn finish_round(&self, mut report: SyncReport, complete: bool) -> SyncReport {
        let height = self.headers_height();
        if complete {
            self.store.write(|set| set.set_verified_height(height));
        }
        self.progress.set_headers_height(height);
        self.progress
            .finish(Some(self.store.read(UtxoSet::verified_height)));

        report.headers_height = height;
        report.warnings = self.progress.warnings();
        report.status = self.status();
        info!(
            height,
            verified = report.transactions_verified,
            addresses = report.addresses_synced,
            warnings = report.warnings.len(),
            stalled = report.status.stalled,
            "Sync round finished"
        );
        report
    }

    /// Extend the header chain to the server's tip
    pub async fn sync_headers(&self) -> Result<HeaderSync> {
        self.progress.set_stage(SyncStage::Headers);
        let batch = self.config.header_batch_size.max(1);
        let mut result = HeaderSync::default();
        let mut lookback = 0u32;
        let mut rejections = 0u32;

        loop {
            self.cancel.check()?;
            let (tip, root) = {
                let chain = self.chain.read();
                (chain.height(), chain.root_height())
            };
            let floor = root.saturating_add(1);
            let start = tip.saturating_add(1).saturating_sub(lookback).max(floor);
            let served = self
                .cancel
                .run(async { self.server.block_headers(start, batch).await.map_err(Error::from) })
                .await?;

            let headers = match decode_headers(&served.value.hex) {
                Ok(headers) => headers,
                Err(reason) => {
                    if self.reject_headers(&served.server, reason, &mut rejections).await {
                        break;
                    }
                    continue;
                }
            };
            let Some(parent) = headers.first().map(|h| h.prev_hash) else {
                break;
            };

            if !self.chain.read().contains(&parent) {
                // The batch does not attach to our tree; look further back
                // before buffering any of it
                if start <= floor {
                    let reason = "headers do not connect to the local chain".to_string();
                    if self.reject_headers(&served.server, reason, &mut rejections).await {
                        break;
                    }
                    lookback = 0;
                    continue;
                }
                lookback = lookback.saturating_mul(2).max(1);
                debug!(start, lookback, "Headers did not connect, walking back");
                continue;
            }

            let submitted = self.chain.write().submit_headers(&headers);
            let updates = match submitted {
                Ok(updates) => updates,
                Err(e) if e.is_peer_fault() => {
                    if self
                        .reject_headers(&served.server, e.to_string(), &mut rejections)
                        .await
                    {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            for update in updates {
                match update {
                    ChainUpdate::Extended { .. } | ChainUpdate::SideBranch { .. } => {
                        result.connected += 1;
                    }
                    ChainUpdate::Reorganized {
                        fork_height,
                        disconnected,
                        connected,
                    } => {
                        result.connected += 1;
                        self.apply_reorg(fork_height, disconnected.len(), connected.len());
                        result.reorgs.push(fork_height);
                    }
                    ChainUpdate::Duplicate | ChainUpdate::Orphaned { .. } => {}
                }
            }

            lookback = 0;
            self.progress.set_headers_height(self.headers_height());
            if (headers.len() as u32) < batch {
                break;
            }
        }

        result.height = self.headers_height();
        self.progress.set_headers_height(result.height);
        Ok(result)
    }

    /// Penalize a server for bad headers; true once the budget is spent.
    /// Headers it left in the orphan buffer go with it.
    async fn reject_headers(&self, server: &str, reason: String, rejections: &mut u32) -> bool {
        self.chain.write().clear_orphans();
        self.server.report_fault(server, &reason).await;
        self.progress.warn(SyncWarning::HeadersRejected {
            server: server.to_string(),
            reason,
        });
        *rejections += 1;
        *rejections >= self.config.verify_attempts.max(1)
    }

    fn apply_reorg(&self, fork_height: u32, disconnected: usize, connected: usize) {
        let impact = self.store.write(|set| set.mark_reorg(fork_height));
        warn!(
            fork_height,
            disconnected,
            connected,
            utxos = impact.utxos,
            transactions = impact.transactions,
            reopened = impact.reopened,
            "Chain reorganized, outputs above the fork need reverification"
        );
    }

    /// Sync `targets` and any addresses derived while applying them
    async fn sync_addresses(
        &self,
        book: &mut AddressBook,
        keys: &KeyChain,
        targets: Vec<String>,
    ) -> Result<AddressRound> {
        let mut round = AddressRound::default();
        let mut seen = HashSet::new();
        let mut queue = targets;

        loop {
            queue.retain(|script_hash| seen.insert(script_hash.clone()));
            if queue.is_empty() {
                break;
            }
            self.progress.set_stage(SyncStage::Histories);
            self.progress.add_pending_addresses(queue.len());
            debug!(addresses = queue.len(), "Syncing address histories");

            let (outcomes, written) = self.run_batch(book, keys, &queue).await;
            let written = written?;
            round.verified += written.verified;
            for outcome in outcomes {
                match outcome {
                    AddressOutcome::Synced => round.synced += 1,
                    AddressOutcome::Failed { unreachable } => {
                        round.failed += 1;
                        if unreachable {
                            round.unreachable += 1;
                        }
                    }
                }
            }
            self.cancel.check()?;
            queue = written.derived;
        }
        Ok(round)
    }

    /// Address tasks feeding the writer over a channel
    async fn run_batch(
        &self,
        book: &mut AddressBook,
        keys: &KeyChain,
        queue: &[String],
    ) -> (Vec<AddressOutcome>, Result<Written>) {
        let known = self.store.snapshot();
        let permits = Semaphore::new(self.config.max_concurrent_addresses.max(1));
        let (sender, mut receiver) = mpsc::channel(EVENT_BUFFER);

        let mut tasks: FuturesUnordered<_> = queue
            .iter()
            .map(|script_hash| {
                let sender = sender.clone();
                let (permits, known) = (&permits, &known);
                async move {
                    let _permit = permits.acquire().await;
                    self.sync_address(script_hash, known, &sender).await
                }
            })
            .collect();
        drop(sender);

        let workers = async {
            let mut outcomes = Vec::with_capacity(queue.len());
            while let Some(outcome) = tasks.next().await {
                outcomes.push(outcome);
            }
            outcomes
        };
        let writer = async {
            let mut writer = StoreWriter::new(&self.store, book, keys);
            while let Some(event) = receiver.recv().await {
                writer.apply(event)?;
            }
            Ok::<_, Error>(writer.finish())
        };
        tokio::join!(workers, writer)
    }

    /// Verify one address's history, sending verified results in order
    async fn sync_address(
        &self,
        script_hash: &str,
        known: &UtxoSet,
        events: &mpsc::Sender<AddressEvent>,
    ) -> AddressOutcome {
        let attempts = self.config.verify_attempts.max(1);
        let mut done: HashSet<Hash256> = HashSet::new();
        let mut failing: HashMap<Hash256, u32> = HashMap::new();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return AddressOutcome::Failed { unreachable: false };
            }
            let history = match self.server.get_history(script_hash).await {
                Ok(history) => history,
                Err(e) => {
                    self.progress.warn(SyncWarning::AddressUnavailable {
                        script_hash: script_hash.to_string(),
                        reason: e.to_string(),
                    });
                    return AddressOutcome::Failed { unreachable: true };
                }
            };
            let items = match history_items(&history.value) {
                Ok(items) => items,
                Err(reason) => {
                    self.server.report_fault(&history.server, &reason).await;
                    if attempt == attempts {
                        self.progress.warn(SyncWarning::AddressUnavailable {
                            script_hash: script_hash.to_string(),
                            reason,
                        });
                        return AddressOutcome::Failed { unreachable: false };
                    }
                    continue;
                }
            };
            let event = AddressEvent::History {
                script_hash: script_hash.to_string(),
                items: items.clone(),
            };
            if events.send(event).await.is_err() {
                return AddressOutcome::Failed { unreachable: false };
            }

            failing.clear();
            let mut ordered = items;
            ordered.sort_by_key(|item| (item.height <= 0, item.height));
            for item in ordered {
                if done.contains(&item.txid) {
                    continue;
                }
                let result = match u32::try_from(item.height) {
                    Ok(height) if height > 0 => {
                        if known.verified_at(&item.txid) == Some(height) {
                            done.insert(item.txid);
                            continue;
                        }
                        self.progress.set_stage(SyncStage::Verifying);
                        self.verify_entry(item.txid, height)
                            .await
                            .map(|tx| AddressEvent::Verified { tx, height })
                    }
                    _ => {
                        let current = known.transaction(&item.txid).map(|t| t.state);
                        if matches!(
                            current,
                            Some(UtxoStatus::Unconfirmed | UtxoStatus::Confirmed { .. })
                        ) {
                            done.insert(item.txid);
                            continue;
                        }
                        self.fetch_transaction(item.txid)
                            .await
                            .map(|tx| AddressEvent::Unconfirmed { tx })
                    }
                };

                let event = match result {
                    Ok(event) => event,
                    Err(e) if e.is_server_fault() => {
                        debug!(txid = %item.txid, error = %e, "History entry failed verification");
                        failing.insert(item.txid, u32::try_from(item.height).unwrap_or(0));
                        continue;
                    }
                    Err(e) => {
                        self.progress.warn(SyncWarning::AddressUnavailable {
                            script_hash: script_hash.to_string(),
                            reason: e.to_string(),
                        });
                        return AddressOutcome::Failed {
                            unreachable: matches!(e, Error::Net(_)),
                        };
                    }
                };
                if events.send(event).await.is_err() {
                    return AddressOutcome::Failed { unreachable: false };
                }
                done.insert(item.txid);
            }

            if failing.is_empty() {
                self.progress.address_done();
                return AddressOutcome::Synced;
            }
            if attempt < attempts {
                debug!(
                    script_hash,
                    attempt,
                    failing = failing.len(),
                    "Re-querying address after failed verification"
                );
                let delay = self.config.retry_delay;
                let slept = self
                    .cancel
                    .run(async {
                        tokio::time::sleep(delay).await;
                        Ok::<_, Error>(())
                    })
                    .await;
                if slept.is_err() {
                    return AddressOutcome::Failed { unreachable: false };
                }
            }
        }

        for (txid, height) in failing {
            self.progress.warn(SyncWarning::InclusionFailed {
                script_hash: script_hash.to_string(),
                txid,
                height,
                attempts,
            });
        }
        AddressOutcome::Failed { unreachable: false }
    }

    /// Check a confirmed entry's proof, then fetch the transaction
    async fn verify_entry(&self, txid: Hash256, height: u32) -> Result<Transaction> {
        let merkle = self.server.get_merkle(&txid.to_hex(), height).await?;
        let proof = match merkle_proof(&merkle.value, height) {
            Ok(proof) => proof,
            Err(reason) => return Err(self.fault(&merkle.server, reason).await),
        };

        let (included, tip) = {
            let chain = self.chain.read();
            (chain.verify_inclusion(&txid, height, &proof), chain.height())
        };
        if !included {
            if height > tip {
                debug!(txid = %txid, height, tip, "Entry is above the local header tip");
            } else {
                self.server
                    .report_fault(&merkle.server, "merkle proof does not match the active chain")
                    .await;
            }
            return Err(Error::InclusionVerificationFailed { txid, height });
        }
        self.fetch_transaction(txid).await
    }

    /// Fetch a transaction and check it hashes to `txid`
    async fn fetch_transaction(&self, txid: Hash256) -> Result<Transaction> {
        let raw = self.server.get_transaction(&txid.to_hex()).await?;
        let tx = match Transaction::from_hex(&raw.value) {
            Ok(tx) => tx,
            Err(e) => {
                let reason = format!("undecodable transaction {txid}: {e}");
                return Err(self.fault(&raw.server, reason).await);
            }
        };
        if tx.txid() != txid {
            let reason = format!("transaction does not hash to {txid}");
            return Err(self.fault(&raw.server, reason).await);
        }
        Ok(tx)
    }

    async fn fault(&self, server: &str, reason: String) -> Error {
        self.server.report_fault(server, &reason).await;
        Error::InvalidServerData {
            server: server.to_string(),
            reason,
        }
    }

    /// Follow server notifications until cancelled.
    ///
    /// New tips extend the header chain (with a full address pass after a
    /// reorg); address activity resyncs that address. The subscription is
    /// renewed when the connection drops or new addresses are derived.
    pub async fn watch(&self, book: &mut AddressBook, keys: &KeyChain) -> Result<()> {
        loop {
            self.cancel.check()?;
            let targets = watched(book);
            let subscribed = self
                .cancel
                .run(async { self.server.subscribe(&targets).await.map_err(Error::from) })
                .await;
            let mut events = match subscribed {
                Ok(events) => events,
                Err(Error::Net(e)) => {
                    warn!(error = %e, "Subscription failed, retrying");
                    self.progress.set_stalled(true);
                    let delay = self.config.retry_delay;
                    self.cancel
                        .run(async {
                            tokio::time::sleep(delay).await;
                            Ok::<_, Error>(())
                        })
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.progress.set_stalled(false);
            info!(addresses = targets.len(), "Watching for activity");

            while let Some(event) = self
                .cancel
                .run(async { Ok::<_, Error>(events.next().await) })
                .await?
            {
                match event {
                    ServerEvent::NewTip { height } => {
                        self.progress.set_target(height);
                        match self.sync_headers().await {
                            Ok(headers) if !headers.reorgs.is_empty() => {
                                let all = watched(book);
                                self.sync_addresses(book, keys, all).await?;
                            }
                            Ok(_) => {}
                            Err(Error::Net(e)) => {
                                warn!(error = %e, "Header sync after new tip failed");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    ServerEvent::AddressActivity { script_hash } => {
                        self.sync_addresses(book, keys, vec![script_hash]).await?;
                    }
                }
                if book.len() != targets.len() {
                    debug!("Address window grew, renewing subscriptions");
                    break;
                }
            }
        }
    }

    /// Relay a signed transaction and record it as unconfirmed
    pub async fn broadcast(
        &self,
        signed: &SignedTransaction,
        book: &mut AddressBook,
        keys: &KeyChain,
    ) -> Result<Hash256> {
        let txid = signed.txid();
        let reported = self.server.broadcast(&signed.to_hex()).await?;
        if reported != txid.to_hex() {
            warn!(txid = %txid, reported = %reported, "Server acknowledged a different txid");
        }
        let mut writer = StoreWriter::new(&self.store, book, keys);
        writer.apply(AddressEvent::Unconfirmed {
            tx: signed.transaction().clone(),
        })?;
        info!(txid = %txid, "Transaction broadcast");
        Ok(txid)
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("headers_height", &self.headers_height())
            .field("config", &self.config)
            .finish()
    }
}

fn watched(book: &AddressBook) -> Vec<String> {
    book.entries()
        .iter()
        .map(|entry| entry.address.script_hash())
        .collect()
}

fn decode_headers(hex_headers: &str) -> std::result::Result<Vec<BlockHeader>, String> {
    let bytes = hex::decode(hex_headers).map_err(|e| format!("bad header hex: {e}"))?;
    BlockHeader::decode_many(&bytes).map_err(|e| e.to_string())
}

fn history_items(entries: &[HistoryEntry]) -> std::result::Result<Vec<HistoryItem>, String> {
    entries
        .iter()
        .map(|entry| {
            Hash256::from_hex(&entry.tx_hash)
                .map(|txid| HistoryItem {
                    txid,
                    height: entry.height,
                })
                .map_err(|e| format!("bad history txid {}: {e}", entry.tx_hash))
        })
        .collect()
}

fn merkle_proof(response: &MerkleResponse, height: u32) -> std::result::Result<MerkleProof, String> {
    if response.block_height != height {
        return Err(format!(
            "proof is for height {} instead of {height}",
            response.block_height
        ));
    }
    let branch = response
        .merkle
        .iter()
        .map(|hash| Hash256::from_hex(hash))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("bad merkle branch: {e}"))?;
    Ok(MerkleProof::new(response.pos, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_chain::build_proof;

    #[test]
    fn test_merkle_proof_from_response() {
        let txids: Vec<Hash256> = (0u8..5).map(|i| Hash256::digest(&[i])).collect();
        let proof = build_proof(&txids, 3).unwrap();
        let response = MerkleResponse {
            block_height: 40,
            merkle: proof.branch.iter().map(Hash256::to_hex).collect(),
            pos: 3,
        };
        assert_eq!(merkle_proof(&response, 40).unwrap(), proof);
        assert!(merkle_proof(&response, 41).is_err());
    }

    #[test]
    fn test_history_items_reject_bad_txid() {
        let good = HistoryEntry {
            tx_hash: Hash256::digest(b"x").to_hex(),
            height: 3,
            fee: None,
        };
        let bad = HistoryEntry {
            tx_hash: "zz".into(),
            height: 3,
            fee: None,
        };
        assert_eq!(history_items(&[good.clone()]).unwrap().len(), 1);
        assert!(history_items(&[good, bad]).is_err());
    }

    #[test]
    fn test_decode_headers_rejects_partial() {
        assert!(decode_headers("00").is_err());
        assert_eq!(decode_headers("").unwrap(), Vec::<BlockHeader>::new());
    }
}
