use std::collections::{BTreeMap, HashMap};

use ledger_core::{Transaction, TxId};

/// Pending transactions, deduplicated by id and kept in (created_at, id)
/// order so every node builds candidates the same way.
#[derive(Debug, Default)]
pub struct Mempool {
    ordered: BTreeMap<(u64, TxId), Transaction>,
    index: HashMap<TxId, u64>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns false if a transaction with the same id is already queued.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, tx.created_at());
        self.ordered.insert((tx.created_at(), id), tx);
        true
    }

    pub fn remove(&mut self, id: &TxId) -> Option<Transaction> {
        let created_at = self.index.remove(id)?;
        self.ordered.remove(&(created_at, *id))
    }

    /// Remove every listed id; returns how many were queued.
    pub fn remove_all(&mut self, ids: impl IntoIterator<Item = TxId>) -> usize {
        ids.into_iter().filter(|id| self.remove(id).is_some()).count()
    }

    /// The whole pending set, in order.
    pub fn select(&self) -> Vec<Transaction> {
        self.ordered.values().cloned().collect()
    }
}
