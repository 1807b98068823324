//! Header checkpoints a chain can be rooted at

use crate::network::NetworkType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A blockchain checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Block height
    pub height: u32,
    /// Block hash (hex, display byte order)
    pub hash: String,
    /// Timestamp (Unix epoch)
    pub timestamp: u32,
    /// Compact difficulty target of the checkpointed block
    pub bits: u32,
}

/// List of checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointList {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointList {
    /// Create a new checkpoint list
    pub fn new(checkpoints: Vec<Checkpoint>) -> Self {
        let mut cp = Self { checkpoints };
        cp.sort();
        cp
    }

    /// Get mainnet checkpoints
    pub fn mainnet() -> Self {
        Self::new(vec![Checkpoint {
            height: 0,
            hash: "12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2".to_string(),
            timestamp: 1_317_972_665,
            bits: 0x1e0f_fff0,
        }])
    }

    /// Get testnet checkpoints
    pub fn testnet() -> Self {
        Self::new(vec![Checkpoint {
            height: 0,
            hash: "4966625a4b2851d9fdee139e56211a0d88575f59ed816ff5e6a63deb4e3e29a0".to_string(),
            timestamp: 1_486_949_366,
            bits: 0x1e0f_fff0,
        }])
    }

    /// Regtest chains are rooted at a caller-supplied genesis header
    pub fn regtest() -> Self {
        Self::new(Vec::new())
    }

    /// Get checkpoints by network type
    pub fn for_network(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }

    /// Load additional checkpoints from a JSON array
    pub fn from_json(json: &str) -> Result<Self> {
        let checkpoints: Vec<Checkpoint> =
            serde_json::from_str(json).map_err(|e| Error::InvalidCheckpoint(e.to_string()))?;
        for cp in &checkpoints {
            if cp.hash.len() != 64 || !cp.hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::InvalidCheckpoint(format!(
                    "bad hash at height {}",
                    cp.height
                )));
            }
        }
        Ok(Self::new(checkpoints))
    }

    /// Sort checkpoints by height
    fn sort(&mut self) {
        self.checkpoints.sort_by_key(|cp| cp.height);
    }

    /// Get checkpoint at or before given height
    pub fn checkpoint_at_height(&self, height: u32) -> Result<&Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|cp| cp.height <= height)
            .ok_or(Error::CheckpointNotFound(height))
    }

    /// Get all checkpoints
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Get latest checkpoint
    pub fn latest(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Get checkpoint count
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}
