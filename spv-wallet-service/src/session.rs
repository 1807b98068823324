//! Wallet session
//!
//! One [`WalletSession`] owns everything a wallet needs: the key chain,
//! the address book, the header chain and UTXO store behind the
//! synchronizer, and the payment request verifier. Callers hold it by
//! value and pass it by reference; there is no process-wide wallet state.

use crate::config::WalletConfig;
use crate::{Error, Result};
use spv_chain::HeaderChain;
use spv_core::{
    AddressBook, AddressEntry, AddressRole, ChangeTarget, DerivationScheme, FeePolicy, Hash256,
    KeyChain, PaymentOutput, PaymentRequestVerifier, TransactionBuilder, UnsignedTransaction,
    VerifiedRequest,
};
use spv_net::NetworkClient;
use spv_params::Network;
use spv_storage::{StoredKeys, WalletSnapshot};
use spv_sync::{
    Balance, CancelToken, ServerApi, SyncProgress, SyncReport, SyncStatus, Synchronizer, UtxoStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// An open wallet
pub struct WalletSession {
    config: WalletConfig,
    network: Network,
    keys: KeyChain,
    book: AddressBook,
    sync: Synchronizer,
    verifier: PaymentRequestVerifier,
    closed: bool,
}

impl WalletSession {
    /// New wallet from seed bytes
    pub fn create_wallet(seed: &[u8], scheme: DerivationScheme, config: WalletConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyChain::from_seed(seed, scheme, config.network_params())?;
        let session = Self::fresh(keys, config)?;
        info!(network = %session.network.name, %scheme, "Created wallet");
        Ok(session)
    }

    /// New wallet from a BIP-39 phrase
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        scheme: DerivationScheme,
        config: WalletConfig,
    ) -> Result<Self> {
        let seed = spv_core::keys::mnemonic_to_seed(phrase, passphrase)?;
        Self::create_wallet(&seed, scheme, config)
    }

    /// Watch-only wallet over an account extended public key
    pub fn watch_only(xpub: &str, scheme: DerivationScheme, config: WalletConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyChain::watch_only(xpub, scheme, config.network_params())?;
        let session = Self::fresh(keys, config)?;
        info!(network = %session.network.name, "Opened watch-only wallet");
        Ok(session)
    }

    fn fresh(keys: KeyChain, config: WalletConfig) -> Result<Self> {
        let mut book = AddressBook::new(config.sync.gap_limit, config.sync.change_gap_limit);
        book.ensure_gap(&keys)?;
        let chain = HeaderChain::new(config.consensus_params(), config.chain_root()?)?;
        Self::assemble(config, keys, book, chain, UtxoStore::default())
    }

    /// Resume from a snapshot, unsealing the seed with `passphrase`
    pub fn restore(snapshot: &WalletSnapshot, passphrase: &str, config: WalletConfig) -> Result<Self> {
        config.validate()?;
        if snapshot.network != config.network {
            return Err(Error::Config(format!(
                "snapshot is for {} but the wallet is configured for {}",
                snapshot.network, config.network
            )));
        }
        let network = config.network_params();
        let keys = match &snapshot.keys {
            StoredKeys::Seed { .. } => {
                let seed = snapshot.keys.open_seed(passphrase)?;
                KeyChain::from_seed(&seed, snapshot.scheme, network)?
            }
            StoredKeys::WatchOnly { xpub } => KeyChain::watch_only(xpub, snapshot.scheme, network)?,
        };
        let book = AddressBook::restore(snapshot.addresses.clone())?;
        let chain = HeaderChain::restore(config.consensus_params(), &snapshot.chain)?;
        if chain.height() != snapshot.headers_height {
            warn!(
                restored = chain.height(),
                recorded = snapshot.headers_height,
                "Restored chain height differs from snapshot"
            );
        }
        let store = UtxoStore::new(snapshot.utxos.clone());
        let session = Self::assemble(config, keys, book, chain, store)?;
        info!(
            height = session.sync.headers_height(),
            addresses = session.book.len(),
            "Restored wallet from snapshot"
        );
        Ok(session)
    }

    /// Load and restore the snapshot at the configured path
    pub fn open(passphrase: &str, config: WalletConfig) -> Result<Self> {
        let snapshot = WalletSnapshot::load(&config.snapshot_path()?)?;
        Self::restore(&snapshot, passphrase, config)
    }

    fn assemble(
        config: WalletConfig,
        keys: KeyChain,
        book: AddressBook,
        chain: HeaderChain,
        store: UtxoStore,
    ) -> Result<Self> {
        let network = config.network_params();
        let verifier = PaymentRequestVerifier::new(config.network, config.anchors()?);
        let server: Arc<dyn ServerApi> = Arc::new(NetworkClient::new(config.client_config()));
        let sync = Synchronizer::new(server, chain, store, config.sync.clone());
        Ok(Self {
            config,
            network,
            keys,
            book,
            sync,
            verifier,
            closed: false,
        })
    }

    /// Use `server` instead of the configured servers
    pub fn with_server(mut self, server: Arc<dyn ServerApi>) -> Self {
        self.sync = self.sync.using_server(server);
        self
    }

    /// Configuration
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Network definition
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Whether the wallet can sign
    pub fn is_watch_only(&self) -> bool {
        self.keys.is_watch_only()
    }

    /// Account extended public key
    pub fn account_xpub(&self) -> String {
        self.keys.account_xpub()
    }

    /// Derived addresses
    pub fn addresses(&self) -> &[AddressEntry] {
        self.book.entries()
    }

    /// Synchronizer
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Progress of the running or last sync round
    pub fn progress(&self) -> &SyncProgress {
        self.sync.progress()
    }

    /// Token that stops a running sync or watch loop
    pub fn cancel_token(&self) -> CancelToken {
        self.sync.cancel_token()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Snapshot of the current state, sealing the seed with `passphrase`
    pub fn snapshot(&self, passphrase: &str) -> Result<WalletSnapshot> {
        self.ensure_open()?;
        let keys = if self.keys.is_watch_only() {
            StoredKeys::WatchOnly {
                xpub: self.keys.account_xpub(),
            }
        } else {
            let kdf = self.config.kdf;
            self.keys
                .with_seed(|seed| StoredKeys::seal_seed(seed, passphrase, kdf))
                .ok_or(Error::Closed)??
        };
        Ok(WalletSnapshot::new(
            self.config.network,
            self.keys.scheme(),
            keys,
            self.sync.chain_snapshot(),
            self.sync.headers_height(),
            self.sync.store().snapshot(),
            self.book.state(),
        ))
    }

    /// Write a snapshot to the configured path
    pub fn save(&self, passphrase: &str) -> Result<PathBuf> {
        let path = self.config.snapshot_path()?;
        self.snapshot(passphrase)?.save(&path)?;
        Ok(path)
    }

    /// One sync round: headers, then every watched address
    pub async fn sync(&mut self) -> Result<SyncReport> {
        self.ensure_open()?;
        Ok(self.sync.sync(&mut self.book, &self.keys).await?)
    }

    /// Follow server notifications until cancelled
    pub async fn watch(&mut self) -> Result<()> {
        self.ensure_open()?;
        Ok(self.sync.watch(&mut self.book, &self.keys).await?)
    }

    /// Balance split by verification state
    pub fn get_balance(&self) -> Balance {
        self.sync.store().balance()
    }

    /// Lowest unused address of `role`, encoded for the network
    pub fn get_next_address(&mut self, role: AddressRole) -> Result<String> {
        self.ensure_open()?;
        let entry = self.book.next_unused(role, &self.keys)?;
        Ok(entry.address.encode(&self.network))
    }

    /// Header and verification heights
    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Build an unsigned transaction paying `outputs` from verified funds
    pub fn build_transaction(
        &self,
        outputs: Vec<PaymentOutput>,
        fee_policy: Option<FeePolicy>,
    ) -> Result<UnsignedTransaction> {
        self.ensure_open()?;
        let mut builder = TransactionBuilder::new(self.network.clone());
        for output in outputs {
            builder.add_output(output)?;
        }
        builder
            .with_fee_policy(fee_policy.unwrap_or(self.config.fee_policy))
            .with_base_fee_rate(self.config.base_fee_rate);

        let change = self
            .book
            .peek_unused(AddressRole::Change)
            .map(|entry| ChangeTarget {
                address: entry.address,
                path: entry.path.clone(),
            })
            .ok_or_else(|| Error::Config("no change address derived".to_string()))?;
        Ok(builder.build(&self.sync.store().spendable(), &change)?)
    }

    /// Decode and verify a payment request
    pub fn verify_payment_request(&self, bytes: &[u8]) -> Result<VerifiedRequest> {
        Ok(self.verifier.verify_bytes(bytes)?)
    }

    /// Build a transaction paying a verified request
    pub fn pay_request(
        &self,
        request: &VerifiedRequest,
        fee_policy: Option<FeePolicy>,
    ) -> Result<UnsignedTransaction> {
        if !request.recipient().is_verified() {
            warn!(total = request.total(), "Paying a request from an unverified recipient");
        }
        self.build_transaction(request.outputs().to_vec(), fee_policy)
    }

    /// Sign, relay and record a built transaction
    pub async fn sign_and_broadcast(&mut self, unsigned: &UnsignedTransaction) -> Result<Hash256> {
        self.ensure_open()?;
        if self.keys.is_watch_only() {
            return Err(spv_core::Error::MissingKey(format!(
                "account {} is watch-only",
                self.keys.account_path()
            ))
            .into());
        }
        let signed = unsigned.sign(&self.keys)?;
        let txid = self.sync.broadcast(&signed, &mut self.book, &self.keys).await?;
        if let Some(change) = unsigned.change() {
            let id = self.book.find_address(&change.address).map(|entry| entry.id);
            if let Some(id) = id {
                self.book.record_share(id);
            }
        }
        Ok(txid)
    }

    /// Stop background work and erase the seed
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.sync.cancel_token().cancel();
        self.keys.close();
        self.closed = true;
        info!("Wallet session closed");
    }

    /// Whether [`WalletSession::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("network", &self.network.name)
            .field("keys", &self.keys)
            .field("addresses", &self.book.len())
            .field("closed", &self.closed)
            .finish()
    }
}
