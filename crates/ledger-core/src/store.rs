use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::{ledger::Snapshot, Block, Hash};

/// A block together with the balances after applying it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainEntry {
    pub block: Block,
    pub snapshot: Snapshot,
}

/// Trait the storage backends implement for the chain to persist itself.
/// This lives in `ledger-core` to avoid a circular dependency.
pub trait ChainStore: Send + Sync {
    /// Write all entries, each at its block's index, as one atomic unit.
    /// Every entry above the last one written is removed.
    fn put_entries(&self, entries: &[ChainEntry]) -> Result<()>;
    /// Everything persisted so far in index order; empty for a fresh store.
    fn load(&self) -> Result<Vec<ChainEntry>>;
    fn tip_height(&self) -> Result<u64>;
    fn tip_hash(&self) -> Result<Option<Hash>>;
    fn close(&self) -> Result<()>;
}

/// Non-durable store for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<ChainEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryStore {
    fn put_entries(&self, entries: &[ChainEntry]) -> Result<()> {
        let mut stored = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let start = first.block.index() as usize;
        if start > stored.len() {
            return Err(anyhow!(
                "entry at index {start} would leave a gap after {} stored entries",
                stored.len()
            ));
        }
        stored.truncate(start);
        stored.extend(entries.iter().cloned());
        Ok(())
    }

    fn load(&self) -> Result<Vec<ChainEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn tip_height(&self) -> Result<u64> {
        let stored = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.len().saturating_sub(1) as u64)
    }

    fn tip_hash(&self) -> Result<Option<Hash>> {
        let stored = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.last().map(|e| *e.block.hash()))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
