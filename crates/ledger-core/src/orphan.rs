use std::collections::HashMap;

use tracing::debug;

use crate::{
    constants::{MAX_ORPHANS, ORPHAN_DEPTH},
    Block, Hash,
};

/// Blocks that could not be attached where they claim to belong, keyed by
/// their hash so a branch can be walked back parent by parent.
#[derive(Clone, Debug)]
pub struct OrphanPool {
    blocks: HashMap<Hash, Block>,
    capacity: usize,
    max_depth: u64,
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new(MAX_ORPHANS, ORPHAN_DEPTH)
    }
}

impl OrphanPool {
    pub fn new(capacity: usize, max_depth: u64) -> Self {
        Self {
            blocks: HashMap::new(),
            capacity: capacity.max(1),
            max_depth,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
        self.blocks.remove(hash)
    }

    /// Stash `block`. When over capacity the lowest-indexed orphan is evicted,
    /// which may be `block` itself.
    pub fn insert(&mut self, block: Block) -> bool {
        let hash = *block.hash();
        if self.blocks.contains_key(&hash) {
            return false;
        }
        self.blocks.insert(hash, block);
        while self.blocks.len() > self.capacity {
            let Some(lowest) = self
                .blocks
                .values()
                .min_by_key(|b| b.index())
                .map(|b| *b.hash())
            else {
                break;
            };
            self.blocks.remove(&lowest);
            debug!(hash = %hex::encode(lowest), "evicted orphan over capacity");
        }
        self.blocks.contains_key(&hash)
    }

    /// Drop orphans too far behind a chain of `chain_len` blocks to ever be
    /// part of a winning branch.
    pub fn prune(&mut self, chain_len: u64) {
        let max_depth = self.max_depth;
        let before = self.blocks.len();
        self.blocks
            .retain(|_, b| b.index().saturating_add(max_depth) >= chain_len);
        let pruned = before - self.blocks.len();
        if pruned > 0 {
            debug!(pruned, chain_len, "pruned stale orphans");
        }
    }

    /// Hashes of orphans at or above `min_index`, highest index first.
    pub fn tips_from(&self, min_index: u64) -> Vec<Hash> {
        let mut tips: Vec<&Block> = self
            .blocks
            .values()
            .filter(|b| b.index() >= min_index)
            .collect();
        tips.sort_by(|a, b| b.index().cmp(&a.index()).then(a.hash().cmp(b.hash())));
        tips.into_iter().map(|b| *b.hash()).collect()
    }
}
