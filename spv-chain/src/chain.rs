//! Fork-aware header tree
//!
//! Every verified header is kept in a tree rooted at genesis or a
//! checkpoint. The branch with the most cumulative work is active; a
//! competing branch replaces it only once its work is strictly greater.

use crate::header::BlockHeader;
use crate::merkle::MerkleProof;
use crate::orphans::{OrphanPool, DEFAULT_MAX_ORPHANS};
use crate::pow::{
    bits_to_target, block_work, check_proof_of_work, kgw_next_bits, median_time, next_bits,
};
use crate::u256::U256;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use spv_core::Hash256;
use spv_params::{Checkpoint, ConsensusParams, DifficultyRule};
use std::collections::HashMap;

/// Block the header tree grows from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRoot {
    /// Full genesis header
    Genesis(BlockHeader),
    /// Trusted checkpoint; only its hash and difficulty are known
    Checkpoint {
        /// Height of the checkpointed block
        height: u32,
        /// Block hash
        hash: Hash256,
        /// Block timestamp
        time: u32,
        /// Compact target of the block
        bits: u32,
    },
}

impl ChainRoot {
    /// Root at a configured checkpoint
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let hash = Hash256::from_hex(&checkpoint.hash)
            .map_err(|e| Error::InvalidRoot(format!("checkpoint {}: {e}", checkpoint.height)))?;
        Ok(ChainRoot::Checkpoint {
            height: checkpoint.height,
            hash,
            time: checkpoint.timestamp,
            bits: checkpoint.bits,
        })
    }

    /// Height of the root block
    pub fn height(&self) -> u32 {
        match self {
            ChainRoot::Genesis(_) => 0,
            ChainRoot::Checkpoint { height, .. } => *height,
        }
    }

    /// Hash of the root block
    pub fn hash(&self) -> Hash256 {
        match self {
            ChainRoot::Genesis(header) => header.hash(),
            ChainRoot::Checkpoint { hash, .. } => *hash,
        }
    }
}

/// Outcome of connecting a header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainUpdate {
    /// The active branch grew; `height`/`hash` are the new tip
    Extended {
        /// New tip height
        height: u32,
        /// New tip hash
        hash: Hash256,
    },
    /// The header joined a branch with no more work than the active one
    SideBranch {
        /// Height of the header
        height: u32,
        /// Hash of the header
        hash: Hash256,
    },
    /// A competing branch overtook the active one
    Reorganized {
        /// Height of the last block both branches share
        fork_height: u32,
        /// Blocks removed from the active branch, lowest first
        disconnected: Vec<Hash256>,
        /// Blocks added to the active branch, lowest first
        connected: Vec<Hash256>,
    },
    /// Header was already known
    Duplicate,
    /// Header was buffered until its parent arrives
    Orphaned {
        /// Missing parent
        parent: Hash256,
    },
}

impl ChainUpdate {
    /// Fork point, when this update switched branches
    pub fn fork_height(&self) -> Option<u32> {
        match self {
            ChainUpdate::Reorganized { fork_height, .. } => Some(*fork_height),
            _ => None,
        }
    }
}

/// Where a header sits relative to the active branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStatus {
    /// Verified and on the active branch
    Active,
    /// Verified but on a branch with less work
    Stale,
    /// Waiting for its parent
    Orphan,
}

/// Tip of the active branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    /// Tip height
    pub height: u32,
    /// Tip hash
    pub hash: Hash256,
    /// Cumulative work from the root
    pub chain_work: U256,
}

/// Active branch in a form that can be persisted and replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Root the headers descend from
    pub root: ChainRoot,
    /// Active headers above the root, lowest first
    pub headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    hash: Hash256,
    header: Option<BlockHeader>,
    height: u32,
    parent: Option<Hash256>,
    chain_work: U256,
    time: u32,
    bits: u32,
}

/// Header tree with an active branch
#[derive(Debug)]
pub struct HeaderChain {
    params: ConsensusParams,
    root: ChainRoot,
    nodes: HashMap<Hash256, Node>,
    /// Active branch hashes, indexed by height above the root
    active: Vec<Hash256>,
    orphans: OrphanPool,
}

impl HeaderChain {
    /// Start a chain at `root`. A genesis root must carry valid proof of work.
    pub fn new(params: ConsensusParams, root: ChainRoot) -> Result<Self> {
        let node = match &root {
            ChainRoot::Genesis(header) => {
                let target = check_proof_of_work(header, &params)
                    .map_err(|e| Error::InvalidRoot(e.to_string()))?;
                Node {
                    hash: header.hash(),
                    header: Some(*header),
                    height: 0,
                    parent: None,
                    chain_work: block_work(target),
                    time: header.time,
                    bits: header.bits,
                }
            }
            ChainRoot::Checkpoint {
                height,
                hash,
                time,
                bits,
            } => Node {
                hash: *hash,
                header: None,
                height: *height,
                parent: None,
                chain_work: block_work(bits_to_target(*bits)?),
                time: *time,
                bits: *bits,
            },
        };

        let mut nodes = HashMap::new();
        nodes.insert(node.hash, node);
        Ok(Self {
            params,
            root,
            nodes,
            active: vec![node.hash],
            orphans: OrphanPool::new(DEFAULT_MAX_ORPHANS),
        })
    }

    /// Rebuild a chain from a snapshot, re-verifying every header
    pub fn restore(params: ConsensusParams, snapshot: &ChainSnapshot) -> Result<Self> {
        let mut chain = Self::new(params, snapshot.root.clone())?;
        for header in &snapshot.headers {
            chain.submit_header(*header)?;
        }
        Ok(chain)
    }

    /// Override the orphan buffer capacity
    pub fn with_max_orphans(mut self, limit: usize) -> Self {
        self.orphans.set_limit(limit);
        self
    }

    /// Consensus parameters
    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Root block
    pub fn root(&self) -> &ChainRoot {
        &self.root
    }

    /// Height of the root block
    pub fn root_height(&self) -> u32 {
        self.root.height()
    }

    /// Verify and connect one header.
    ///
    /// A header whose parent is unknown is buffered and reported as
    /// [`Error::OrphanHeader`]; once the parent connects, buffered
    /// descendants connect with it.
    pub fn submit_header(&mut self, header: BlockHeader) -> Result<ChainUpdate> {
        let hash = header.hash();
        if self.nodes.contains_key(&hash) || self.orphans.contains(&hash) {
            return Ok(ChainUpdate::Duplicate);
        }

        check_proof_of_work(&header, &self.params)?;

        if !self.nodes.contains_key(&header.prev_hash) {
            let evicted = self.orphans.insert(header);
            tracing::debug!(
                hash = %hash,
                parent = %header.prev_hash,
                buffered = self.orphans.len(),
                "Buffered orphan header"
            );
            if !evicted.is_empty() {
                tracing::warn!(
                    evicted = evicted.len(),
                    limit = self.orphans.limit(),
                    "Orphan buffer full, dropped oldest headers"
                );
                return Err(Error::OrphanOverflow {
                    parent: header.prev_hash,
                    evicted: evicted.len(),
                });
            }
            return Err(Error::OrphanHeader(header.prev_hash));
        }

        let mut best = self.connect(header)?;
        let mut pending = vec![hash];
        while let Some(parent) = pending.pop() {
            for child in self.orphans.take_children(&parent) {
                match self.connect(child) {
                    Ok(child_hash) => {
                        if self.work_of(&child_hash) > self.work_of(&best) {
                            best = child_hash;
                        }
                        pending.push(child_hash);
                    }
                    Err(e) => {
                        tracing::warn!(hash = %child.hash(), error = %e, "Dropped buffered header");
                    }
                }
            }
        }

        Ok(self.select_best(best, hash))
    }

    /// Submit a run of headers; orphans are reported, not fatal, even when
    /// they push older orphans out of the buffer
    pub fn submit_headers(&mut self, headers: &[BlockHeader]) -> Result<Vec<ChainUpdate>> {
        let mut updates = Vec::with_capacity(headers.len());
        for header in headers {
            match self.submit_header(*header) {
                Ok(update) => updates.push(update),
                Err(Error::OrphanHeader(parent) | Error::OrphanOverflow { parent, .. }) => {
                    updates.push(ChainUpdate::Orphaned { parent })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(updates)
    }

    /// Whether `proof` links `txid` to the active header at `height`.
    ///
    /// False when no full header is on the active branch at that height.
    pub fn verify_inclusion(&self, txid: &Hash256, height: u32, proof: &MerkleProof) -> bool {
        match self.header_at(height) {
            Some(header) => proof.verify(txid, &header.merkle_root),
            None => false,
        }
    }

    /// Tip of the active branch
    pub fn tip(&self) -> ChainTip {
        let node = self.tip_node();
        ChainTip {
            height: node.height,
            hash: node.hash,
            chain_work: node.chain_work,
        }
    }

    /// Height of the active tip
    pub fn height(&self) -> u32 {
        self.tip_node().height
    }

    /// Active header at `height`
    pub fn header_at(&self, height: u32) -> Option<&BlockHeader> {
        let hash = self.hash_at(height)?;
        self.nodes.get(&hash)?.header.as_ref()
    }

    /// Active block hash at `height`
    pub fn hash_at(&self, height: u32) -> Option<Hash256> {
        let index = height.checked_sub(self.root_height())?;
        self.active.get(index as usize).copied()
    }

    /// Whether the header is verified (on any branch)
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Height of a verified header on any branch
    pub fn height_of(&self, hash: &Hash256) -> Option<u32> {
        self.nodes.get(hash).map(|node| node.height)
    }

    /// Status of a known header
    pub fn status(&self, hash: &Hash256) -> Option<HeaderStatus> {
        if let Some(node) = self.nodes.get(hash) {
            return Some(if self.is_active(node) {
                HeaderStatus::Active
            } else {
                HeaderStatus::Stale
            });
        }
        self.orphans.contains(hash).then_some(HeaderStatus::Orphan)
    }

    /// Number of buffered orphans
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Drop every buffered orphan, returning how many there were
    pub fn clear_orphans(&mut self) -> usize {
        let dropped = self.orphans.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared orphan buffer");
        }
        dropped
    }

    /// Hashes from the tip back to the root, densely near the tip
    pub fn locator(&self) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        let mut index = self.active.len() as i64 - 1;
        let mut step = 1i64;
        while index > 0 {
            hashes.push(self.active[index as usize]);
            if hashes.len() >= 10 {
                step *= 2;
            }
            index -= step;
        }
        hashes.push(self.active[0]);
        hashes
    }

    /// Active branch for persistence
    pub fn export(&self) -> ChainSnapshot {
        let headers = self
            .active
            .iter()
            .skip(1)
            .filter_map(|hash| self.nodes.get(hash).and_then(|node| node.header))
            .collect();
        ChainSnapshot {
            root: self.root.clone(),
            headers,
        }
    }

    fn tip_node(&self) -> &Node {
        let hash = self.active.last().unwrap_or(&self.active[0]);
        &self.nodes[hash]
    }

    fn work_of(&self, hash: &Hash256) -> U256 {
        self.nodes.get(hash).map_or(U256::ZERO, |node| node.chain_work)
    }

    fn is_active(&self, node: &Node) -> bool {
        node.height
            .checked_sub(self.root_height())
            .and_then(|index| self.active.get(index as usize))
            == Some(&node.hash)
    }

    fn connect(&mut self, header: BlockHeader) -> Result<Hash256> {
        let parent = *self
            .nodes
            .get(&header.prev_hash)
            .ok_or(Error::OrphanHeader(header.prev_hash))?;
        let height = parent
            .height
            .checked_add(1)
            .ok_or_else(|| Error::InvalidHeader("height overflow".to_string()))?;

        self.check_difficulty(&header, &parent, height)?;
        self.check_timestamp(&header, &parent)?;

        let hash = header.hash();
        let node = Node {
            hash,
            header: Some(header),
            height,
            parent: Some(parent.hash),
            chain_work: parent.chain_work.saturating_add(header.work()?),
            time: header.time,
            bits: header.bits,
        };
        self.nodes.insert(hash, node);
        Ok(hash)
    }

    /// Make `candidate` the tip if it has more work than the current one
    fn select_best(&mut self, candidate: Hash256, submitted: Hash256) -> ChainUpdate {
        let tip = self.tip_node().hash;
        if self.work_of(&candidate) <= self.work_of(&tip) {
            let height = self.nodes.get(&submitted).map_or(0, |node| node.height);
            tracing::debug!(hash = %submitted, height, "Header on side branch");
            return ChainUpdate::SideBranch {
                height,
                hash: submitted,
            };
        }

        let mut connected = Vec::new();
        let mut cursor = self.nodes.get(&candidate).copied();
        while let Some(node) = cursor {
            if self.is_active(&node) {
                break;
            }
            connected.push(node.hash);
            cursor = node.parent.and_then(|p| self.nodes.get(&p).copied());
        }
        connected.reverse();

        let fork_index = cursor.map_or(0, |node| node.height - self.root_height()) as usize;
        let disconnected = self.active.split_off(fork_index + 1);
        self.active.extend_from_slice(&connected);

        let tip = self.tip();
        if disconnected.is_empty() {
            tracing::debug!(height = tip.height, hash = %tip.hash, "Chain extended");
            ChainUpdate::Extended {
                height: tip.height,
                hash: tip.hash,
            }
        } else {
            let fork_height = self.root_height() + fork_index as u32;
            tracing::info!(
                fork_height,
                disconnected = disconnected.len(),
                connected = connected.len(),
                new_tip = %tip.hash,
                "Chain reorganized"
            );
            ChainUpdate::Reorganized {
                fork_height,
                disconnected,
                connected,
            }
        }
    }

    fn check_difficulty(&self, header: &BlockHeader, parent: &Node, height: u32) -> Result<()> {
        match self.required_bits(parent, height, header.time)? {
            Some(bits) if bits != header.bits => Err(Error::InvalidProofOfWork(format!(
                "header at height {height} has bits {:#010x}, expected {bits:#010x}",
                header.bits
            ))),
            _ => Ok(()),
        }
    }

    /// Expected compact target at `height`; `None` when the history the
    /// rule needs reaches below the root
    fn required_bits(&self, parent: &Node, height: u32, time: u32) -> Result<Option<u32>> {
        match self.params.difficulty_rule(height) {
            DifficultyRule::Retarget => self.retarget_bits(parent, height, time),
            DifficultyRule::KimotoGravityWell {
                spacing,
                past_blocks_min,
                past_blocks_max,
            } => self.kgw_bits(parent, spacing, past_blocks_min, past_blocks_max),
        }
    }

    fn kgw_bits(
        &self,
        parent: &Node,
        spacing: u32,
        past_blocks_min: u32,
        past_blocks_max: u32,
    ) -> Result<Option<u32>> {
        if parent.height == 0 || parent.height < past_blocks_min {
            return Ok(Some(self.params.pow_limit_bits));
        }
        let mut window = Vec::with_capacity(past_blocks_max as usize);
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if window.len() == past_blocks_max as usize {
                break;
            }
            window.push((node.time, node.bits));
            cursor = node.parent.and_then(|p| self.nodes.get(&p));
        }
        let reached_genesis = self.root_height() == 0 && window.len() as u32 == parent.height + 1;
        let complete = window.len() == past_blocks_max as usize || reached_genesis;
        kgw_next_bits(&window, complete, spacing, past_blocks_min, &self.params)
    }

    fn retarget_bits(&self, parent: &Node, height: u32, time: u32) -> Result<Option<u32>> {
        let interval = self.params.retarget_interval().max(1);

        if height % interval != 0 {
            if self.params.allow_min_difficulty {
                let spacing = self.params.target_spacing as u64;
                if time as u64 > parent.time as u64 + 2 * spacing {
                    return Ok(Some(self.params.pow_limit_bits));
                }
                return Ok(Some(self.last_non_minimum_bits(parent, interval)));
            }
            return Ok(Some(parent.bits));
        }

        if !self.params.is_retarget_height(height) {
            return Ok(Some(parent.bits));
        }

        // The first retarget measures one block fewer
        let first_height = if height == interval {
            0
        } else {
            height - 1 - interval
        };
        let Some(first) = self.ancestor(parent, first_height) else {
            return Ok(None);
        };
        let actual = parent.time as i64 - first.time as i64;
        Ok(Some(next_bits(parent.bits, actual, &self.params)?))
    }

    fn last_non_minimum_bits(&self, parent: &Node, interval: u32) -> u32 {
        let limit = self.params.pow_limit_bits;
        let mut node = parent;
        while node.bits == limit && node.height % interval != 0 {
            match node.parent.and_then(|p| self.nodes.get(&p)) {
                Some(prev) => node = prev,
                None => break,
            }
        }
        node.bits
    }

    fn check_timestamp(&self, header: &BlockHeader, parent: &Node) -> Result<()> {
        let span = self.params.median_time_span;
        let mut times = Vec::with_capacity(span);
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if times.len() == span {
                break;
            }
            times.push(node.time);
            cursor = node.parent.and_then(|p| self.nodes.get(&p));
        }
        if span == 0 || times.len() < span {
            return Ok(());
        }

        let median = median_time(&times);
        if header.time <= median {
            return Err(Error::InvalidHeader(format!(
                "time {} not after median time {median}",
                header.time
            )));
        }
        Ok(())
    }

    /// Ancestor of `from` at `height`, jumping through the active index
    /// once the walk reaches the active branch
    fn ancestor(&self, from: &Node, height: u32) -> Option<&Node> {
        if height > from.height || height < self.root_height() {
            return None;
        }
        let mut node = self.nodes.get(&from.hash)?;
        while node.height > height {
            if self.is_active(node) {
                return self.nodes.get(&self.hash_at(height)?);
            }
            node = self.nodes.get(&node.parent?)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{branch, genesis, mine, regtest_params};
    use spv_params::PowAlgorithm;

    fn chain_with(count: usize) -> (HeaderChain, Vec<BlockHeader>) {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();
        let headers = branch(&params, &root, count, 0);
        for header in &headers {
            chain.submit_header(*header).unwrap();
        }
        (chain, headers)
    }

    #[test]
    fn test_extend_and_query() {
        let (chain, headers) = chain_with(5);
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.tip().hash, headers[4].hash());
        assert_eq!(chain.header_at(3), Some(&headers[2]));
        assert_eq!(chain.hash_at(6), None);
        assert_eq!(chain.status(&headers[0].hash()), Some(HeaderStatus::Active));
        assert_eq!(chain.tip().chain_work, U256::from_u64(12));
    }

    #[test]
    fn test_duplicate_header() {
        let (mut chain, headers) = chain_with(2);
        assert_eq!(chain.submit_header(headers[1]).unwrap(), ChainUpdate::Duplicate);
    }

    #[test]
    fn test_bad_pow_rejected_before_parent_lookup() {
        let params = regtest_params();
        let (mut chain, _) = chain_with(1);
        let mut header = mine(&params, Hash256::digest(b"unknown"), 1, params.pow_limit_bits, Hash256::ZERO);
        // Find a nonce that fails the target
        while check_proof_of_work(&header, &params).is_ok() {
            header.nonce += 1;
        }
        assert!(matches!(
            chain.submit_header(header),
            Err(Error::InvalidProofOfWork(_))
        ));
        assert_eq!(chain.orphan_count(), 0);
    }

    #[test]
    fn test_orphans_connect_when_parent_arrives() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();
        let headers = branch(&params, &root, 4, 0);

        for header in headers.iter().skip(1).rev() {
            assert!(matches!(chain.submit_header(*header), Err(Error::OrphanHeader(_))));
        }
        assert_eq!(chain.orphan_count(), 3);
        assert_eq!(chain.status(&headers[3].hash()), Some(HeaderStatus::Orphan));

        let update = chain.submit_header(headers[0]).unwrap();
        assert_eq!(
            update,
            ChainUpdate::Extended {
                height: 4,
                hash: headers[3].hash()
            }
        );
        assert_eq!(chain.orphan_count(), 0);
    }

    #[test]
    fn test_orphan_overflow() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root))
            .unwrap()
            .with_max_orphans(2);
        let headers = branch(&params, &root, 5, 0);

        assert!(chain.submit_header(headers[2]).is_err());
        assert!(chain.submit_header(headers[3]).is_err());
        assert!(matches!(
            chain.submit_header(headers[4]),
            Err(Error::OrphanOverflow { evicted: 1, .. })
        ));
        assert_eq!(chain.orphan_count(), 2);
        assert_eq!(chain.status(&headers[2].hash()), None);

        // The survivors still connect once the gap is filled
        chain.submit_headers(&headers[..3]).unwrap();
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.orphan_count(), 0);
    }

    #[test]
    fn test_orphan_flood_stays_bounded() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root))
            .unwrap()
            .with_max_orphans(8);
        let headers = branch(&params, &root, 40, 0);

        let updates = chain.submit_headers(&headers[1..]).unwrap();
        assert!(updates.iter().all(|u| matches!(u, ChainUpdate::Orphaned { .. })));
        assert_eq!(chain.orphan_count(), 8);

        assert_eq!(chain.clear_orphans(), 8);
        assert_eq!(chain.orphan_count(), 0);
        chain.submit_headers(&headers).unwrap();
        assert_eq!(chain.height(), 40);
    }

    #[test]
    fn test_equal_work_does_not_switch() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();
        let a = branch(&params, &root, 2, 1);
        let b = branch(&params, &root, 2, 2);
        chain.submit_headers(&a).unwrap();

        let updates = chain.submit_headers(&b).unwrap();
        assert!(updates.iter().all(|u| matches!(u, ChainUpdate::SideBranch { .. })));
        assert_eq!(chain.tip().hash, a[1].hash());
        assert_eq!(chain.status(&b[1].hash()), Some(HeaderStatus::Stale));
    }

    #[test]
    fn test_reorg_reports_fork_point() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();
        let a = branch(&params, &root, 3, 1);
        chain.submit_headers(&a).unwrap();
        let b = branch(&params, &a[0], 3, 2);

        let updates = chain.submit_headers(&b).unwrap();
        assert_eq!(
            updates.last().unwrap(),
            &ChainUpdate::Reorganized {
                fork_height: 1,
                disconnected: vec![a[1].hash(), a[2].hash()],
                connected: b.iter().map(BlockHeader::hash).collect(),
            }
        );
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.status(&a[2].hash()), Some(HeaderStatus::Stale));
    }

    #[test]
    fn test_min_difficulty_bits_enforced() {
        let params = regtest_params();
        let (mut chain, headers) = chain_with(1);
        let parent = headers[0];
        let wrong = mine(&params, parent.hash(), parent.time + 150, 0x200f_ffff, Hash256::ZERO);
        assert!(matches!(
            chain.submit_header(wrong),
            Err(Error::InvalidProofOfWork(_))
        ));
    }

    #[test]
    fn test_retarget_enforced() {
        let params = ConsensusParams {
            target_timespan: 600,
            target_spacing: 150,
            allow_min_difficulty: false,
            no_retargeting: false,
            ..ConsensusParams::regtest()
        }
        .with_pow_algorithm(PowAlgorithm::Sha256d);
        assert_eq!(params.retarget_interval(), 4);

        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();
        // Blocks arrive twice as fast as planned
        let mut prev = root;
        for _ in 0..3 {
            let next = mine(&params, prev.hash(), prev.time + 75, prev.bits, Hash256::ZERO);
            chain.submit_header(next).unwrap();
            prev = next;
        }

        let expected = next_bits(prev.bits, (prev.time - root.time) as i64, &params).unwrap();
        assert_ne!(expected, prev.bits);

        let stale = mine(&params, prev.hash(), prev.time + 75, prev.bits, Hash256::ZERO);
        assert!(matches!(
            chain.submit_header(stale),
            Err(Error::InvalidProofOfWork(_))
        ));

        let retargeted = mine(&params, prev.hash(), prev.time + 75, expected, Hash256::ZERO);
        assert!(matches!(
            chain.submit_header(retargeted).unwrap(),
            ChainUpdate::Extended { height: 4, .. }
        ));
    }

    #[test]
    fn test_kgw_era_enforced() {
        let rule = DifficultyRule::KimotoGravityWell {
            spacing: 150,
            past_blocks_min: 2,
            past_blocks_max: 6,
        };
        let params = regtest_params().with_difficulty_era(1, rule);
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();

        let mut headers = vec![root];
        for height in 1..=10u32 {
            let parent = headers[headers.len() - 1];
            let expected = if height - 1 < 2 {
                params.pow_limit_bits
            } else {
                let window: Vec<(u32, u32)> =
                    headers.iter().rev().take(6).map(|h| (h.time, h.bits)).collect();
                let complete = window.len() == 6 || window.len() == headers.len();
                kgw_next_bits(&window, complete, 150, 2, &params).unwrap().unwrap()
            };
            let next = mine(&params, parent.hash(), parent.time + 150, expected, Hash256::ZERO);
            assert!(matches!(
                chain.submit_header(next).unwrap(),
                ChainUpdate::Extended { .. }
            ));
            headers.push(next);
        }
        assert_ne!(headers[10].bits, params.pow_limit_bits);

        let tip = headers[10];
        let easy = mine(&params, tip.hash(), tip.time + 150, params.pow_limit_bits, Hash256::ZERO);
        assert!(matches!(
            chain.submit_header(easy),
            Err(Error::InvalidProofOfWork(_))
        ));
    }

    #[test]
    fn test_timestamp_must_pass_median() {
        let params = regtest_params();
        let (mut chain, headers) = chain_with(11);
        let parent = headers[10];
        let early = mine(&params, parent.hash(), headers[5].time, params.pow_limit_bits, Hash256::ZERO);
        assert!(matches!(chain.submit_header(early), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_verify_inclusion_on_active_branch_only() {
        let params = regtest_params();
        let root = genesis(&params);
        let mut chain = HeaderChain::new(params.clone(), ChainRoot::Genesis(root)).unwrap();

        let txids: Vec<Hash256> = (0u8..3).map(|i| Hash256::digest(&[i])).collect();
        let merkle = crate::merkle::merkle_root(&txids).unwrap();
        let block = mine(&params, root.hash(), root.time + 150, params.pow_limit_bits, merkle);
        chain.submit_header(block).unwrap();

        let proof = crate::merkle::build_proof(&txids, 1).unwrap();
        assert!(chain.verify_inclusion(&txids[1], 1, &proof));
        assert!(!chain.verify_inclusion(&txids[0], 1, &proof));
        assert!(!chain.verify_inclusion(&txids[1], 2, &proof));
        // Past the tip
        assert!(!chain.verify_inclusion(&txids[1], u32::MAX, &proof));
    }

    #[test]
    fn test_checkpoint_root() {
        let params = regtest_params();
        let anchor = genesis(&params);
        let root = ChainRoot::Checkpoint {
            height: 1000,
            hash: anchor.hash(),
            time: anchor.time,
            bits: anchor.bits,
        };
        let mut chain = HeaderChain::new(params.clone(), root).unwrap();
        let headers = branch(&params, &anchor, 3, 0);
        chain.submit_headers(&headers).unwrap();

        assert_eq!(chain.height(), 1003);
        assert_eq!(chain.header_at(1001), Some(&headers[0]));
        assert_eq!(chain.header_at(1000), None);
        assert_eq!(chain.hash_at(999), None);
    }

    #[test]
    fn test_locator_ends_at_root() {
        let (chain, headers) = chain_with(30);
        let locator = chain.locator();
        assert_eq!(locator[0], headers[29].hash());
        assert_eq!(*locator.last().unwrap(), chain.root().hash());
        assert!(locator.len() < 30);
    }

    #[test]
    fn test_export_restore() {
        let (chain, _) = chain_with(6);
        let snapshot = chain.export();
        assert_eq!(snapshot.headers.len(), 6);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ChainSnapshot = serde_json::from_str(&json).unwrap();
        let restored = HeaderChain::restore(regtest_params(), &parsed).unwrap();
        assert_eq!(restored.tip(), chain.tip());
    }
}
