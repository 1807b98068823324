//! Wallet configuration
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! the settings it changes.

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use spv_chain::{BlockHeader, ChainRoot};
use spv_core::{FeePolicy, TrustAnchors, DEFAULT_FEE_RATE};
use spv_net::ClientConfig;
use spv_params::{CheckpointList, ConsensusParams, Network, NetworkType};
use spv_storage::KdfParams;
use spv_sync::SyncConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Wallet configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network the wallet runs on
    pub network: NetworkType,
    /// Servers as `host:port`; the network's defaults when empty
    pub servers: Vec<String>,
    /// Snapshot file; defaults to the platform data directory
    pub snapshot_path: Option<PathBuf>,
    /// Fee policy for transactions that do not name one
    pub fee_policy: FeePolicy,
    /// Base fee rate in base units per byte
    pub base_fee_rate: u64,
    /// Hex public keys trusted to certify payment requests
    pub trust_anchors: Vec<String>,
    /// Hex genesis header, for networks without a built-in checkpoint
    pub genesis_header: Option<String>,
    /// Passphrase key derivation cost
    pub kdf: KdfParams,
    /// Sync behavior, including gap limits
    pub sync: SyncConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::for_network(NetworkType::Mainnet)
    }
}

impl WalletConfig {
    /// Defaults for `network`
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            servers: Vec::new(),
            snapshot_path: None,
            fee_policy: FeePolicy::Standard,
            base_fee_rate: DEFAULT_FEE_RATE,
            trust_anchors: Vec::new(),
            genesis_header: None,
            kdf: KdfParams::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings no wallet can run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.gap_limit == 0 || self.sync.change_gap_limit == 0 {
            return Err(Error::Config("gap limits must be at least 1".to_string()));
        }
        if self.sync.verify_attempts == 0 {
            return Err(Error::Config("verify_attempts must be at least 1".to_string()));
        }
        if let Some(genesis) = &self.genesis_header {
            BlockHeader::from_hex(genesis)
                .map_err(|e| Error::Config(format!("genesis_header: {e}")))?;
        }
        self.anchors()?;
        Ok(())
    }

    /// Platform directories for this application
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("org", "SpvWallet", "spv-wallet")
    }

    /// Default location of the config file
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Where the snapshot is read and written
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.snapshot_path {
            return Ok(path.clone());
        }
        Self::project_dirs()
            .map(|dirs| {
                dirs.data_local_dir()
                    .join("wallets")
                    .join(format!("wallet-{}.json", self.network))
            })
            .ok_or_else(|| Error::Config("no data directory; set snapshot_path".to_string()))
    }

    /// Network definition
    pub fn network_params(&self) -> Network {
        Network::from_type(self.network)
    }

    /// Consensus rules for header verification
    pub fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams::from_network(self.network)
    }

    /// Network client settings
    pub fn client_config(&self) -> ClientConfig {
        if self.servers.is_empty() {
            ClientConfig::with_servers(self.network_params().default_servers.iter().copied())
        } else {
            ClientConfig::with_servers(self.servers.iter().cloned())
        }
    }

    /// Root a new header chain grows from
    pub fn chain_root(&self) -> Result<ChainRoot> {
        if let Some(genesis) = &self.genesis_header {
            return Ok(ChainRoot::Genesis(BlockHeader::from_hex(genesis)?));
        }
        let checkpoints = CheckpointList::for_network(self.network);
        match checkpoints.latest() {
            Some(checkpoint) => Ok(ChainRoot::from_checkpoint(checkpoint)?),
            None => Err(Error::Config(format!(
                "{} has no checkpoint; set genesis_header",
                self.network
            ))),
        }
    }

    /// Payment request trust anchors
    pub fn anchors(&self) -> Result<TrustAnchors> {
        Ok(TrustAnchors::from_hex(&self.trust_anchors)?)
    }
}
