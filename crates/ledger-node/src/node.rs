use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Receiver,
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};

use ledger_core::{
    mine::hash_block_parallel,
    now_millis,
    pow::{hash_block, AbortSignal},
    Amount, Block, BlockChain, BlockOutcome, ChainError, ChainStore, ChainUpdate, Genesis, Hash,
    Snapshot, Transaction, TxId,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::NodeConfig,
    mempool::Mempool,
    message::{Message, MessageKind},
    messenger::Messenger,
};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one select, hash and commit round.
#[derive(Debug)]
pub enum MiningOutcome {
    /// Nothing pending.
    Idle,
    /// The pending set would overdraw an account; these ids were dropped.
    Dropped(Vec<TxId>),
    /// An inbound block or a stop request interrupted the search.
    Aborted,
    /// The chain moved on while hashing; the block was discarded.
    Stale,
    /// The chain refused our own block (a failed write, typically).
    Rejected(ChainError),
    Mined(Block),
}

/// A point-in-time view of the node.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub id: String,
    pub height: u64,
    pub tip_hash: Hash,
    pub pending: usize,
    pub total_supply: Amount,
    pub balances: Snapshot,
}

struct NodeState<S: ChainStore> {
    chain: BlockChain<S>,
    pending: Mempool,
}

struct Inner<S: ChainStore> {
    config: NodeConfig,
    messenger: Arc<dyn Messenger>,
    state: Mutex<NodeState<S>>,
    wake: Condvar,
    abort: AbortSignal,
    stop: AtomicBool,
}

/// One participant: its chain, its pending transactions and the mining
/// loop. Cloning yields another handle to the same node.
pub struct Node<S: ChainStore> {
    inner: Arc<Inner<S>>,
}

impl<S: ChainStore> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ChainStore + 'static> Node<S> {
    /// Load the chain held by `store`, or start one from `genesis`.
    pub fn open(
        config: NodeConfig,
        store: Arc<S>,
        genesis: &Genesis,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, NodeError> {
        let chain = BlockChain::open(store, genesis, config.mining.target())?;
        info!(
            node = %config.id,
            height = chain.len() - 1,
            tip = %hex::encode(chain.tip_hash()),
            target = %chain.target(),
            "node ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                messenger,
                state: Mutex::new(NodeState {
                    chain,
                    pending: Mempool::new(),
                }),
                wake: Condvar::new(),
                abort: AbortSignal::new(),
                stop: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.lock();
        let ledger = state.chain.ledger();
        NodeStatus {
            id: self.inner.config.id.clone(),
            height: state.chain.len() - 1,
            tip_hash: state.chain.tip_hash(),
            pending: state.pending.len(),
            total_supply: ledger.total_supply(),
            balances: ledger.latest().clone(),
        }
    }

    pub fn chain_len(&self) -> u64 {
        self.lock().chain.len()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.lock().chain.ledger().balance_of(account)
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock().pending.select()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.lock().chain.blocks().to_vec()
    }

    /// Render the chain as the `Display` of [`BlockChain`] does.
    pub fn render_chain(&self) -> String {
        self.lock().chain.to_string()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Queue a locally created transaction and gossip it to every peer.
    pub fn submit_transaction(&self, tx: Transaction) -> bool {
        let queued = self.enqueue(tx.clone());
        if queued {
            self.broadcast(MessageKind::Transaction, &tx.to_json());
        }
        queued
    }

    /// Entry point for everything that arrives from peers. Errors describe
    /// why a message was ignored; nothing is sent back to the sender.
    pub fn handle_incoming_message(
        &self,
        kind: MessageKind,
        contents: &str,
    ) -> Result<(), NodeError> {
        match kind {
            MessageKind::Transaction => {
                let tx = Transaction::from_json(contents)?;
                self.enqueue(tx);
                Ok(())
            }
            MessageKind::Block => {
                let block = Block::from_json(contents)?;
                let index = block.index();
                let result = {
                    let mut state = self.lock();
                    let result = state.chain.process_block(block);
                    if let Ok(update) = &result {
                        Self::apply_update(&mut state, update);
                    }
                    // Even a rejected block may mean our candidate is stale.
                    self.inner.abort.raise();
                    self.inner.wake.notify_all();
                    result
                };
                match result {
                    Ok(update) if update.changed() => {
                        info!(
                            node = %self.id(),
                            index,
                            outcome = ?update.outcome,
                            added = update.added.len(),
                            removed = update.removed.len(),
                            "accepted inbound block"
                        );
                        Ok(())
                    }
                    Ok(update) => {
                        debug!(node = %self.id(), index, outcome = ?update.outcome, "inbound block");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(node = %self.id(), index, error = %e, "rejected inbound block");
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Run one round of select, hash and commit.
    pub fn mine_next(&self) -> MiningOutcome {
        let target = self.inner.config.mining.target();
        let candidate = {
            let mut state = self.lock();
            if state.pending.is_empty() {
                return MiningOutcome::Idle;
            }
            // Anything raised before this point is already reflected in
            // the state we are about to read.
            self.inner.abort.clear();
            if self.is_stopped() {
                return MiningOutcome::Aborted;
            }
            let txs = state.pending.select();
            let index = state.chain.len();
            if let Err(e) = state.chain.ledger().verify_transactions(&txs, index) {
                let dropped: Vec<TxId> = match e.offending() {
                    Some(ids) => ids.iter().copied().collect(),
                    None => txs.iter().map(Transaction::id).collect(),
                };
                state.pending.remove_all(dropped.iter().copied());
                warn!(
                    node = %self.id(),
                    index,
                    dropped = dropped.len(),
                    error = %e,
                    "dropping invalid transactions"
                );
                return MiningOutcome::Dropped(dropped);
            }
            Block::construct(index, state.chain.tip_hash(), now_millis(), 0, txs)
        };

        debug!(
            node = %self.id(),
            index = candidate.index(),
            txs = candidate.txs().len(),
            "hashing candidate"
        );
        let mined = if self.inner.config.mining.parallel {
            hash_block_parallel(candidate, &target, &self.inner.abort)
        } else {
            hash_block(candidate, &target, &self.inner.abort)
        };
        let Some(block) = mined else {
            debug!(node = %self.id(), "mining aborted");
            return MiningOutcome::Aborted;
        };

        {
            let mut state = self.lock();
            if state.chain.len() != block.index() || state.chain.tip_hash() != *block.previous_hash()
            {
                debug!(node = %self.id(), index = block.index(), "competing block won the race");
                return MiningOutcome::Stale;
            }
            match state.chain.process_block(block.clone()) {
                Ok(update) if update.outcome == BlockOutcome::Appended => {
                    Self::apply_update(&mut state, &update);
                }
                Ok(update) => {
                    debug!(node = %self.id(), outcome = ?update.outcome, "mined block not appended");
                    return MiningOutcome::Stale;
                }
                Err(e) => {
                    warn!(node = %self.id(), index = block.index(), error = %e, "failed to commit mined block");
                    return MiningOutcome::Rejected(e);
                }
            }
        }

        info!(
            node = %self.id(),
            index = block.index(),
            nonce = block.nonce(),
            txs = block.txs().len(),
            hash = %hex::encode(block.hash()),
            "mined block"
        );
        self.broadcast(MessageKind::Block, &block.to_json());
        MiningOutcome::Mined(block)
    }

    /// Block until there is something to mine. Returns false once stopped.
    pub fn wait_for_work(&self) -> bool {
        let mut state = self.lock();
        while state.pending.is_empty() && !self.is_stopped() {
            state = self
                .inner
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !self.is_stopped()
    }

    /// Mine until [`Node::stop`] is called.
    pub fn mine_until_stopped(&self) {
        while self.wait_for_work() {
            match self.mine_next() {
                MiningOutcome::Rejected(e) => {
                    warn!(node = %self.id(), error = %e, "stopping miner after failed commit");
                    break;
                }
                outcome => debug!(node = %self.id(), ?outcome, "mining round finished"),
            }
        }
        info!(node = %self.id(), "miner stopped");
    }

    pub fn spawn_miner(&self) -> Result<JoinHandle<()>, NodeError> {
        let node = self.clone();
        let name = format!("miner-{}", self.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || node.mine_until_stopped())
            .map_err(|source| NodeError::Spawn { name, source })
    }

    /// Feed `inbox` into [`Node::handle_incoming_message`] until every
    /// sender is gone.
    pub fn spawn_listener(&self, inbox: Receiver<Message>) -> Result<JoinHandle<()>, NodeError> {
        let node = self.clone();
        let name = format!("inbox-{}", self.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for message in inbox {
                    if let Err(e) = node.handle_incoming_message(message.kind, &message.contents) {
                        debug!(node = %node.id(), kind = %message.kind, error = %e, "ignored message");
                    }
                }
            })
            .map_err(|source| NodeError::Spawn { name, source })
    }

    /// Interrupt any search in progress and release the miner.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.abort.raise();
        let _state = self.lock();
        self.inner.wake.notify_all();
    }

    /// Flush the underlying store.
    pub fn close(&self) -> Result<(), NodeError> {
        let state = self.lock();
        state
            .chain
            .store()
            .close()
            .map_err(|e| NodeError::Chain(ChainError::PersistenceFailure(e)))
    }

    fn enqueue(&self, tx: Transaction) -> bool {
        let mut state = self.lock();
        if state.chain.contains_transaction(&tx.id()) {
            debug!(node = %self.id(), tx = %hex::encode(tx.id()), "transaction already mined");
            return false;
        }
        let queued = state.pending.insert(tx);
        if queued {
            self.inner.wake.notify_all();
        }
        queued
    }

    fn apply_update(state: &mut NodeState<S>, update: &ChainUpdate) {
        for block in &update.added {
            state.pending.remove_all(block.txs().iter().map(Transaction::id));
        }
        for block in &update.removed {
            for tx in block.txs() {
                if !state.chain.contains_transaction(&tx.id()) {
                    state.pending.insert(tx.clone());
                }
            }
        }
    }

    fn broadcast(&self, kind: MessageKind, contents: &str) {
        for peer in &self.inner.config.peers {
            if let Err(e) = self.inner.messenger.send(kind, contents, peer) {
                debug!(node = %self.id(), %peer, error = %e, "send failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState<S>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
