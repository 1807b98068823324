//! Merkle inclusion proofs
//!
//! Levels with an odd number of nodes duplicate their last node, so a
//! proof for a single-child node carries the node itself as sibling.

use serde::{Deserialize, Serialize};
use spv_core::Hash256;

/// Deepest branch accepted; deeper trees cannot fit in a block
pub const MAX_BRANCH_LENGTH: usize = 32;

/// Branch from a transaction up to its block's merkle root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the transaction in its block
    pub position: u32,
    /// Sibling hashes, leaf level first
    pub branch: Vec<Hash256>,
}

impl MerkleProof {
    /// Create a proof
    pub fn new(position: u32, branch: Vec<Hash256>) -> Self {
        Self { position, branch }
    }

    /// Fold the branch into a root.
    ///
    /// Returns `None` when the position does not fit the tree the branch
    /// describes, or when a right-hand node is paired with itself (only a
    /// left-hand node can be duplicated).
    pub fn compute_root(&self, txid: &Hash256) -> Option<Hash256> {
        if self.branch.len() > MAX_BRANCH_LENGTH {
            return None;
        }
        if (self.position as u64) >> self.branch.len() != 0 {
            return None;
        }

        let mut node = *txid;
        let mut index = self.position;
        for sibling in &self.branch {
            node = if index & 1 == 1 {
                if *sibling == node {
                    return None;
                }
                Hash256::merkle_parent(sibling, &node)
            } else {
                Hash256::merkle_parent(&node, sibling)
            };
            index >>= 1;
        }
        Some(node)
    }

    /// Whether the proof links `txid` to `root`
    pub fn verify(&self, txid: &Hash256, root: &Hash256) -> bool {
        self.compute_root(txid).as_ref() == Some(root)
    }
}

/// Merkle root of a block's transaction ids; `None` for an empty list
pub fn merkle_root(txids: &[Hash256]) -> Option<Hash256> {
    let mut level = txids.to_vec();
    if level.is_empty() {
        return None;
    }
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied()
}

/// Proof for the transaction at `index`; `None` when out of range
pub fn build_proof(txids: &[Hash256], index: usize) -> Option<MerkleProof> {
    if index >= txids.len() {
        return None;
    }
    let position = u32::try_from(index).ok()?;
    let mut branch = Vec::new();
    let mut level = txids.to_vec();
    let mut i = index;
    while level.len() > 1 {
        let sibling = level.get(i ^ 1).unwrap_or(&level[i]);
        branch.push(*sibling);
        level = next_level(&level);
        i >>= 1;
    }
    Some(MerkleProof::new(position, branch))
}

fn next_level(level: &[Hash256]) -> Vec<Hash256> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            Hash256::merkle_parent(left, pair.get(1).unwrap_or(left))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(n: usize) -> Vec<Hash256> {
        (0..n).map(|i| Hash256::digest(&(i as u64).to_le_bytes())).collect()
    }

    #[test]
    fn test_single_transaction_root() {
        let ids = txids(1);
        assert_eq!(merkle_root(&ids), Some(ids[0]));
        let proof = build_proof(&ids, 0).unwrap();
        assert!(proof.branch.is_empty());
        assert!(proof.verify(&ids[0], &ids[0]));
    }

    #[test]
    fn test_every_leaf_verifies() {
        for n in [2, 3, 5, 8, 11] {
            let ids = txids(n);
            let root = merkle_root(&ids).unwrap();
            for (i, id) in ids.iter().enumerate() {
                let proof = build_proof(&ids, i).unwrap();
                assert!(proof.verify(id, &root), "leaf {i} of {n}");
            }
        }
    }

    #[test]
    fn test_known_two_leaf_root() {
        let ids = txids(2);
        assert_eq!(merkle_root(&ids), Some(Hash256::merkle_parent(&ids[0], &ids[1])));
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let ids = txids(6);
        let root = merkle_root(&ids).unwrap();
        let mut proof = build_proof(&ids, 3).unwrap();

        assert!(!proof.verify(&ids[2], &root));

        proof.branch[1] = Hash256::digest(b"forged");
        assert!(!proof.verify(&ids[3], &root));
    }

    #[test]
    fn test_position_beyond_width_rejected() {
        let ids = txids(4);
        let root = merkle_root(&ids).unwrap();
        let mut proof = build_proof(&ids, 1).unwrap();
        proof.position += 4;
        assert_eq!(proof.compute_root(&ids[1]), None);
        assert!(!proof.verify(&ids[1], &root));
    }

    #[test]
    fn test_duplicated_node_cannot_claim_right_side() {
        // Leaf 2 of 3 is paired with itself
        let ids = txids(3);
        let root = merkle_root(&ids).unwrap();
        let proof = build_proof(&ids, 2).unwrap();
        assert_eq!(proof.branch[0], ids[2]);
        assert!(proof.verify(&ids[2], &root));

        let phantom = MerkleProof::new(3, proof.branch.clone());
        assert!(!phantom.verify(&ids[2], &root));
    }

    #[test]
    fn test_out_of_range_index() {
        assert!(build_proof(&txids(3), 3).is_none());
        assert!(merkle_root(&[]).is_none());
    }
}
