//! Header mining helpers for tests on cheap regtest difficulty

use crate::header::BlockHeader;
use crate::pow::check_proof_of_work;
use spv_core::Hash256;
use spv_params::{ConsensusParams, PowAlgorithm};

/// Seconds between mined headers
pub const BLOCK_SPACING: u32 = 150;

/// Regtest parameters with double-SHA256 proof of work
pub fn regtest_params() -> ConsensusParams {
    ConsensusParams::regtest().with_pow_algorithm(PowAlgorithm::Sha256d)
}

/// Search nonces until the header meets its own target
pub fn mine(
    params: &ConsensusParams,
    prev_hash: Hash256,
    time: u32,
    bits: u32,
    merkle_root: Hash256,
) -> BlockHeader {
    let mut header = BlockHeader {
        version: 0x2000_0000,
        prev_hash,
        merkle_root,
        time,
        bits,
        nonce: 0,
    };
    while check_proof_of_work(&header, params).is_err() {
        header.nonce = header
            .nonce
            .checked_add(1)
            .unwrap_or_else(|| panic!("no nonce satisfies bits {bits:#010x}"));
    }
    header
}

/// Genesis header at the pow limit
pub fn genesis(params: &ConsensusParams) -> BlockHeader {
    mine(
        params,
        Hash256::ZERO,
        1_700_000_000,
        params.pow_limit_bits,
        Hash256::digest(b"genesis"),
    )
}

/// Mine one child per merkle root, each on top of the last
pub fn branch_with_roots(
    params: &ConsensusParams,
    parent: &BlockHeader,
    roots: impl IntoIterator<Item = Hash256>,
) -> Vec<BlockHeader> {
    let mut prev = *parent;
    roots
        .into_iter()
        .map(|root| {
            prev = mine(
                params,
                prev.hash(),
                prev.time + BLOCK_SPACING,
                params.pow_limit_bits,
                root,
            );
            prev
        })
        .collect()
}

/// Mine `count` headers on `parent`; `tag` keeps sibling branches distinct
pub fn branch(
    params: &ConsensusParams,
    parent: &BlockHeader,
    count: usize,
    tag: u8,
) -> Vec<BlockHeader> {
    let roots = (0..count as u32).map(|i| {
        let mut seed = [tag; 5];
        seed[1..].copy_from_slice(&i.to_le_bytes());
        Hash256::digest(&seed)
    });
    branch_with_roots(params, parent, roots)
}
