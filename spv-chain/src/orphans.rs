//! Bounded buffer for headers whose parent has not arrived yet

use crate::header::BlockHeader;
use spv_core::Hash256;
use std::collections::{HashMap, VecDeque};

/// Default orphan buffer capacity
pub const DEFAULT_MAX_ORPHANS: usize = 512;

#[derive(Debug)]
pub(crate) struct OrphanPool {
    by_hash: HashMap<Hash256, BlockHeader>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    /// Insertion order; may hold hashes already taken out of `by_hash`
    order: VecDeque<Hash256>,
    limit: usize,
}

impl OrphanPool {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            by_hash: HashMap::new(),
            by_parent: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        while self.by_hash.len() > self.limit {
            if self.evict_oldest().is_none() {
                break;
            }
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub(crate) fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Buffer a header. A full pool drops its oldest headers to make room;
    /// their hashes are returned.
    pub(crate) fn insert(&mut self, header: BlockHeader) -> Vec<Hash256> {
        let hash = header.hash();
        if self.by_hash.contains_key(&hash) {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        while self.by_hash.len() >= self.limit.max(1) {
            match self.evict_oldest() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }
        self.by_parent.entry(header.prev_hash).or_default().push(hash);
        self.by_hash.insert(hash, header);
        self.order.push_back(hash);
        if self.order.len() > 2 * self.limit.max(1) {
            let by_hash = &self.by_hash;
            self.order.retain(|h| by_hash.contains_key(h));
        }
        evicted
    }

    fn evict_oldest(&mut self) -> Option<Hash256> {
        while let Some(hash) = self.order.pop_front() {
            let Some(header) = self.by_hash.remove(&hash) else {
                continue;
            };
            if let Some(siblings) = self.by_parent.get_mut(&header.prev_hash) {
                siblings.retain(|h| *h != hash);
                if siblings.is_empty() {
                    self.by_parent.remove(&header.prev_hash);
                }
            }
            return Some(hash);
        }
        None
    }

    /// Remove and return the buffered children of `parent`
    pub(crate) fn take_children(&mut self, parent: &Hash256) -> Vec<BlockHeader> {
        self.by_parent
            .remove(parent)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hash| self.by_hash.remove(&hash))
            .collect()
    }

    /// Drop everything
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.by_hash.len();
        self.by_hash.clear();
        self.by_parent.clear();
        self.order.clear();
        dropped
    }
}
