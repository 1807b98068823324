//! Network parameters and constants for the SPV wallet engine
//!
//! This crate provides network-specific constants, consensus parameters
//! used by header verification, and the checkpoints a header chain can be
//! rooted at.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoints;
pub mod consensus;
pub mod network;

pub use checkpoints::{Checkpoint, CheckpointList};
pub use consensus::{
    AlgorithmSlot, ConsensusParams, DifficultyEra, DifficultyRule, PowAlgorithm, PowRule,
    PowSelection,
};
pub use network::{Network, NetworkType};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Invalid block height
    #[error("Invalid block height: {0}")]
    InvalidHeight(u32),

    /// Checkpoint not found
    #[error("No checkpoint found for height {0}")]
    CheckpointNotFound(u32),

    /// Checkpoint file could not be parsed
    #[error("Invalid checkpoint data: {0}")]
    InvalidCheckpoint(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
