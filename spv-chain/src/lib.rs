//! SPV header chain
//!
//! Header verification for a light wallet: the 80-byte header codec,
//! compact-target arithmetic and proof-of-work hashing, difficulty
//! rules, a fork-aware header tree with an orphan buffer, and merkle
//! inclusion proofs checked against the active branch.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod header;
pub mod merkle;
mod orphans;
pub mod pow;
pub mod u256;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use chain::{ChainRoot, ChainSnapshot, ChainTip, ChainUpdate, HeaderChain, HeaderStatus};
pub use error::{Error, Result};
pub use header::{BlockHeader, HEADER_SIZE};
pub use merkle::{build_proof, merkle_root, MerkleProof};
pub use orphans::DEFAULT_MAX_ORPHANS;
pub use pow::{
    bits_to_target, block_work, check_proof_of_work, kgw_next_bits, next_bits, target_to_bits,
};
pub use u256::U256;
