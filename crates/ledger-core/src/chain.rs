use std::{collections::HashSet, fmt, sync::Arc};

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ChainError, LedgerError},
    ledger::{Genesis, Ledger},
    orphan::OrphanPool,
    pow::Target,
    store::{ChainEntry, ChainStore},
    Block, Hash, TxId,
};

/// What happened to the block handed to [`BlockChain::process_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Extended the tip directly.
    Appended,
    /// Became part of the chain through a reorganization.
    Adopted,
    /// Held back; its position is taken or its ancestry is incomplete.
    Orphaned,
    /// Already in the chain at its index.
    Duplicate,
}

/// Net effect of processing one block.
#[derive(Clone, Debug)]
pub struct ChainUpdate {
    pub outcome: BlockOutcome,
    /// Blocks that joined the chain, in index order.
    pub added: Vec<Block>,
    /// Blocks that left the chain.
    pub removed: Vec<Block>,
}

impl ChainUpdate {
    fn new(outcome: BlockOutcome) -> Self {
        Self {
            outcome,
            added: vec![],
            removed: vec![],
        }
    }

    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }

    fn absorb(&mut self, other: ChainUpdate) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }

    /// Successive reorganizations can displace blocks an earlier step added;
    /// keep only what differs between the starting and final chain.
    fn settle(&mut self, chain: &[Block]) {
        let in_chain = |b: &Block| chain.get(b.index() as usize) == Some(b);
        self.added.retain(|b| in_chain(b));
        self.removed.retain(|b| !in_chain(b));
        self.added.sort_by_key(Block::index);
        self.added.dedup();
    }
}

/// The local chain, its balance ledger and the orphans that may one day
/// replace part of it. Every mutation goes through [`BlockChain::process_block`].
pub struct BlockChain<S: ChainStore> {
    store: Arc<S>,
    blocks: Vec<Block>,
    ledger: Ledger,
    orphans: OrphanPool,
    target: Target,
}

impl<S: ChainStore> BlockChain<S> {
    /// Load the chain persisted in `store`, or start a new one from the fixed
    /// genesis block and persist it immediately.
    pub fn open(store: Arc<S>, genesis: &Genesis, target: Target) -> Result<Self, ChainError> {
        let entries = store.load().map_err(ChainError::PersistenceFailure)?;

        if entries.is_empty() {
            let entry = ChainEntry {
                block: Block::genesis(),
                snapshot: genesis.balances.clone(),
            };
            store
                .put_entries(std::slice::from_ref(&entry))
                .map_err(ChainError::PersistenceFailure)?;
            info!(accounts = genesis.balances.len(), "initialized chain at genesis");
            return Ok(Self {
                store,
                blocks: vec![entry.block],
                ledger: Ledger::new(genesis),
                orphans: OrphanPool::default(),
                target,
            });
        }

        let mut blocks: Vec<Block> = Vec::with_capacity(entries.len());
        let mut snapshots = Vec::with_capacity(entries.len());
        for (i, ChainEntry { block, snapshot }) in entries.into_iter().enumerate() {
            let linked = match blocks.last() {
                None => block.is_genesis(),
                Some(parent) => block.previous_hash() == parent.hash(),
            };
            if block.index() != i as u64 || !linked {
                return Err(ChainError::PersistenceFailure(anyhow!(
                    "stored chain is broken at index {i}"
                )));
            }
            blocks.push(block);
            snapshots.push(snapshot);
        }
        let tip = &blocks[blocks.len() - 1];
        let stored_height = store.tip_height().map_err(ChainError::PersistenceFailure)?;
        let stored_hash = store.tip_hash().map_err(ChainError::PersistenceFailure)?;
        if stored_height != tip.index() || stored_hash.as_ref() != Some(tip.hash()) {
            return Err(ChainError::PersistenceFailure(anyhow!(
                "store tip {stored_height} does not match loaded block {}",
                tip.index()
            )));
        }
        if snapshots[0] != genesis.balances {
            warn!("stored genesis balances differ from configuration; keeping stored state");
        }
        let ledger = Ledger::from_snapshots(snapshots)
            .ok_or_else(|| ChainError::PersistenceFailure(anyhow!("stored ledger is empty")))?;
        info!(height = blocks.len() - 1, "loaded chain from store");

        Ok(Self {
            store,
            blocks,
            ledger,
            orphans: OrphanPool::default(),
            target,
        })
    }

    pub fn with_orphan_pool(mut self, orphans: OrphanPool) -> Self {
        self.orphans = orphans;
        self
    }

    pub fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Always false: genesis is present from construction on.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get_last_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash {
        *self.get_last_block().hash()
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn orphans(&self) -> &OrphanPool {
        &self.orphans
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn contains_transaction(&self, id: &TxId) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| b.txs())
            .any(|tx| tx.id() == *id)
    }

    /// Validate `block` and place it: append, stash as orphan, or adopt a
    /// longer branch it completes.
    ///
    /// Returns an error only when the block itself is invalid or the
    /// resulting commit could not be persisted; in both cases nothing changed.
    pub fn process_block(&mut self, block: Block) -> Result<ChainUpdate, ChainError> {
        block.check_transactions()?;
        let len = self.len();
        let index = block.index();
        let hash = *block.hash();

        if self.block(index) == Some(&block) {
            debug!(index, "block already in chain");
            return Ok(ChainUpdate::new(BlockOutcome::Duplicate));
        }

        if index == len && block.previous_hash() == self.get_last_block().hash() {
            let mut update = self.replace_from(vec![block]).inspect_err(|e| {
                warn!(index, hash = %hex::encode(hash), error = %e, "rejected block");
            })?;
            update.outcome = BlockOutcome::Appended;
            info!(index, hash = %hex::encode(hash), txs = update.added[0].txs().len(), "appended block");
            match self.adopt_orphans(None) {
                Ok(more) => update.absorb(more),
                Err(e) => error!(error = %e, "could not adopt orphans after append"),
            }
            update.settle(&self.blocks);
            return Ok(update);
        }

        if index == 0 {
            return Err(ChainError::MalformedInput("competing genesis block".into()));
        }
        if !block.verify_proof_of_work(&self.target) {
            warn!(index, hash = %hex::encode(hash), "rejected block: proof of work");
            return Err(ChainError::InvalidProofOfWork { index });
        }

        self.orphans.insert(block);
        debug!(index, len, hash = %hex::encode(hash), orphans = self.orphans.len(), "stashed orphan");
        let mut update = self.adopt_orphans(Some(&hash))?;
        update.settle(&self.blocks);
        update.outcome = if update.added.iter().any(|b| b.hash() == &hash) {
            BlockOutcome::Adopted
        } else {
            BlockOutcome::Orphaned
        };
        Ok(update)
    }

    /// Try every orphan that would make the chain strictly longer as the tip
    /// of a replacement branch, highest first, until none applies.
    fn adopt_orphans(&mut self, focus: Option<&Hash>) -> Result<ChainUpdate, ChainError> {
        let mut update = ChainUpdate::new(BlockOutcome::Orphaned);
        'scan: loop {
            for tip in self.orphans.tips_from(self.len()) {
                let branch = match self.branch_from(&tip) {
                    Ok(branch) => branch,
                    Err(e) if focus == Some(&tip) => {
                        warn!(error = %e, "cannot reorganize onto received block");
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, "orphan branch incomplete");
                        continue;
                    }
                };
                let fork_index = branch[0].index();
                let old_height = self.len() - 1;
                match self.replace_from(branch) {
                    Ok(step) => {
                        info!(
                            fork_index,
                            old_height,
                            new_height = self.len() - 1,
                            displaced = step.removed.len(),
                            "reorganized chain"
                        );
                        update.absorb(step);
                        continue 'scan;
                    }
                    Err(e @ ChainError::PersistenceFailure(_)) => return Err(e),
                    Err(e) => {
                        warn!(fork_index, error = %e, "discarding invalid branch");
                        self.orphans.remove(&tip);
                    }
                }
            }
            return Ok(update);
        }
    }

    /// Walk back from orphan `tip` through the orphan pool until reaching a
    /// parent in the current chain. Returns the branch oldest first.
    fn branch_from(&self, tip: &Hash) -> Result<Vec<Block>, ChainError> {
        let mut cursor = self
            .orphans
            .get(tip)
            .cloned()
            .ok_or_else(|| ChainError::MalformedInput(format!("unknown orphan {}", hex::encode(tip))))?;
        let gap = |b: &Block| ChainError::OrphanGap {
            index: b.index(),
            missing: hex::encode(b.previous_hash()),
        };
        let mut branch = Vec::new();
        loop {
            let Some(parent_index) = cursor.index().checked_sub(1) else {
                return Err(gap(&cursor));
            };
            if self
                .block(parent_index)
                .is_some_and(|p| p.hash() == cursor.previous_hash())
            {
                branch.push(cursor);
                break;
            }
            let parent = match self.orphans.get(cursor.previous_hash()) {
                Some(p) if p.index() == parent_index => p.clone(),
                _ => return Err(gap(&cursor)),
            };
            branch.push(cursor);
            cursor = parent;
        }
        branch.reverse();
        Ok(branch)
    }

    /// Validate `branch` against the chain below its first block, then persist
    /// and install it in one step. Nothing changes unless every block passes.
    fn replace_from(&mut self, branch: Vec<Block>) -> Result<ChainUpdate, ChainError> {
        let Some(first) = branch.first() else {
            return Ok(ChainUpdate::new(BlockOutcome::Orphaned));
        };
        let fork = first.index();
        let mut expected_prev = match fork.checked_sub(1).and_then(|i| self.block(i)) {
            Some(parent) => *parent.hash(),
            None => {
                return Err(ChainError::OrphanGap {
                    index: fork,
                    missing: hex::encode(first.previous_hash()),
                })
            }
        };
        let mut seen: HashSet<TxId> = self.blocks[..fork as usize]
            .iter()
            .flat_map(|b| b.txs())
            .map(|tx| tx.id())
            .collect();

        let mut entries: Vec<ChainEntry> = Vec::with_capacity(branch.len());
        for (offset, block) in branch.into_iter().enumerate() {
            let index = fork + offset as u64;
            if block.index() != index || block.previous_hash() != &expected_prev {
                return Err(ChainError::MalformedInput(format!(
                    "block {} does not continue the branch at index {index}",
                    block.index()
                )));
            }
            block.check_transactions()?;
            if !block.verify_proof_of_work(&self.target) {
                return Err(ChainError::InvalidProofOfWork { index });
            }
            if let Some(tx) = block.txs().iter().find(|tx| seen.contains(&tx.id())) {
                return Err(LedgerError::Replay { id: tx.id() }.into());
            }
            let snapshot = match entries.last() {
                None => self.ledger.verify_transactions(block.txs(), index)?,
                Some(parent) => Ledger::apply(&parent.snapshot, block.txs())?,
            };
            seen.extend(block.txs().iter().map(|tx| tx.id()));
            expected_prev = *block.hash();
            entries.push(ChainEntry { block, snapshot });
        }

        self.commit(fork, entries)
    }

    /// Persist first; only a successful write is reflected in memory.
    fn commit(&mut self, fork: u64, entries: Vec<ChainEntry>) -> Result<ChainUpdate, ChainError> {
        self.store
            .put_entries(&entries)
            .map_err(ChainError::PersistenceFailure)?;

        let removed = self.blocks.split_off(fork as usize);
        let mut added = Vec::with_capacity(entries.len());
        for ChainEntry { block, snapshot } in entries {
            self.ledger.commit_state(snapshot, block.index())?;
            self.orphans.remove(block.hash());
            self.blocks.push(block.clone());
            added.push(block);
        }
        for block in &removed {
            self.orphans.insert(block.clone());
        }
        self.orphans.prune(self.len());

        Ok(ChainUpdate {
            outcome: BlockOutcome::Adopted,
            added,
            removed,
        })
    }
}

impl<S: ChainStore> fmt::Display for BlockChain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(75);
        for block in &self.blocks {
            writeln!(f, "{rule}")?;
            write!(f, "{block}")?;
        }
        writeln!(f, "{rule}")
    }
}
