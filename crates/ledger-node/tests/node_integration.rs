use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use ledger_core::{
    pow::{hash_block, AbortSignal},
    Amount, Block, ChainError, ChainStore, Genesis, Hash, MemoryStore, Transaction,
};
use ledger_node::{
    LocalNetwork, MessageKind, Messenger, MiningConfig, MiningOutcome, Node, NodeConfig,
    NodeError,
};
use ledger_storage::SledStore;
use tempfile::tempdir;

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(MessageKind, String, String)>>,
}

impl Recorder {
    fn blocks_sent(&self) -> Vec<(String, Block)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _, _)| *kind == MessageKind::Block)
            .map(|(_, contents, peer)| (peer.clone(), Block::from_json(contents).unwrap()))
            .collect()
    }
}

impl Messenger for Recorder {
    fn send(&self, kind: MessageKind, contents: &str, peer: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((kind, contents.to_string(), peer.to_string()));
        Ok(())
    }
}

fn abcd() -> Genesis {
    Genesis::uniform(["A", "B", "C", "D"], Amount::whole(10))
}

fn config(id: &str, peers: &[&str], difficulty: u32) -> NodeConfig {
    NodeConfig {
        id: id.to_string(),
        peers: peers.iter().map(|p| p.to_string()).collect(),
        mining: MiningConfig {
            difficulty,
            parallel: false,
        },
    }
}

fn recording_node(difficulty: u32) -> (Node<MemoryStore>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let node = Node::open(
        config("n0", &["p1", "p2"], difficulty),
        Arc::new(MemoryStore::new()),
        &abcd(),
        recorder.clone(),
    )
    .unwrap();
    (node, recorder)
}

fn send_tx<S: ChainStore + 'static>(node: &Node<S>, tx: &Transaction) {
    node.handle_incoming_message(MessageKind::Transaction, &tx.to_json())
        .unwrap();
}

fn mine_on(parent: &Block, txs: Vec<Transaction>, difficulty: u32, created_at: u64) -> Block {
    let candidate = Block::construct(parent.index() + 1, *parent.hash(), created_at, 0, txs);
    let target = MiningConfig {
        difficulty,
        parallel: false,
    }
    .target();
    hash_block(candidate, &target, &AbortSignal::new()).unwrap()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn mined_transfer_updates_balances_and_is_broadcast() {
    let (node, recorder) = recording_node(1);
    let tx = Transaction::new("A", "B", Amount::whole(5));
    send_tx(&node, &tx);
    assert_eq!(node.pending(), vec![tx.clone()]);

    let MiningOutcome::Mined(block) = node.mine_next() else {
        panic!("expected a mined block");
    };
    assert_eq!(block.index(), 1);
    assert_eq!(block.txs(), &[tx]);
    assert_eq!(node.balance_of("A"), Amount::whole(5));
    assert_eq!(node.balance_of("B"), Amount::whole(15));

    let status = node.status();
    assert_eq!(status.height, 1);
    assert_eq!(status.tip_hash, *block.hash());
    assert_eq!(status.total_supply, Amount::whole(40));
    assert_eq!(status.pending, 0);

    let sent = recorder.blocks_sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, b)| b == &block));
    assert_eq!(sent[0].0, "p1");
    assert_eq!(sent[1].0, "p2");

    assert!(matches!(node.mine_next(), MiningOutcome::Idle));
}

#[test]
fn overdraft_is_dropped_and_never_mined() {
    let (node, _) = recording_node(1);
    let bad = Transaction::with_timestamp("A", "B", Amount::whole(15), 1);
    let good = Transaction::with_timestamp("C", "D", Amount::whole(1), 2);
    send_tx(&node, &bad);
    send_tx(&node, &good);

    match node.mine_next() {
        MiningOutcome::Dropped(ids) => assert_eq!(ids, vec![bad.id()]),
        other => panic!("expected the overdraft to be dropped, got {other:?}"),
    }
    assert_eq!(node.chain_len(), 1);
    assert_eq!(node.pending(), vec![good.clone()]);

    let MiningOutcome::Mined(block) = node.mine_next() else {
        panic!("expected a mined block");
    };
    assert_eq!(block.txs(), &[good]);
    assert!(node
        .blocks()
        .iter()
        .all(|b| b.txs().iter().all(|tx| tx.id() != bad.id())));
    assert_eq!(node.balance_of("A"), Amount::whole(10));
}

#[test]
fn duplicate_and_already_mined_transactions_are_ignored() {
    let (node, _) = recording_node(1);
    let tx = Transaction::new("A", "B", Amount::whole(1));
    send_tx(&node, &tx);
    send_tx(&node, &tx);
    assert_eq!(node.pending().len(), 1);

    assert!(matches!(node.mine_next(), MiningOutcome::Mined(_)));
    send_tx(&node, &tx);
    assert!(node.pending().is_empty());
    assert!(!node.submit_transaction(tx));
}

#[test]
fn submit_transaction_gossips_to_peers() {
    let (node, recorder) = recording_node(1);
    let tx = Transaction::new("A", "B", Amount::whole(1));
    assert!(node.submit_transaction(tx.clone()));
    let sent = recorder.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|(kind, contents, _)| *kind == MessageKind::Transaction
            && Transaction::from_json(contents).unwrap() == tx));
}

#[test]
fn malformed_messages_change_nothing() {
    let (node, _) = recording_node(1);
    let err = node
        .handle_incoming_message(MessageKind::Transaction, "not json")
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Chain(ChainError::MalformedInput(_))
    ));
    assert!(node
        .handle_incoming_message(MessageKind::Block, "{}")
        .is_err());
    assert_eq!(node.chain_len(), 1);
    assert!(node.pending().is_empty());
}

#[test]
fn inbound_block_without_work_is_rejected() {
    let (node, _) = recording_node(3);
    let candidate = Block::construct(
        1,
        *Block::genesis().hash(),
        1,
        0,
        vec![Transaction::with_timestamp("A", "B", Amount::whole(1), 1)],
    );
    // Find a nonce whose hash misses the target.
    let target = node.config().mining.target();
    let block = (0..)
        .map(|nonce| {
            let mut c = candidate.clone();
            c.nonce = nonce;
            c.finalize()
        })
        .find(|b| !target.is_met_by(b.hash()))
        .unwrap();
    let err = node
        .handle_incoming_message(MessageKind::Block, &block.to_json())
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Chain(ChainError::InvalidProofOfWork { index: 1 })
    ));
    assert_eq!(node.chain_len(), 1);
}

#[test]
fn inbound_block_takes_its_transactions_out_of_the_queue() {
    let (node, _) = recording_node(1);
    let tx = Transaction::with_timestamp("A", "B", Amount::whole(2), 5);
    let other = Transaction::with_timestamp("C", "D", Amount::whole(2), 6);
    send_tx(&node, &tx);
    send_tx(&node, &other);

    let block = mine_on(&Block::genesis(), vec![tx], 1, 10);
    node.handle_incoming_message(MessageKind::Block, &block.to_json())
        .unwrap();
    assert_eq!(node.chain_len(), 2);
    assert_eq!(node.pending(), vec![other.clone()]);

    let MiningOutcome::Mined(mined) = node.mine_next() else {
        panic!("expected a mined block");
    };
    assert_eq!(mined.index(), 2);
    assert_eq!(mined.previous_hash(), block.hash());
    assert_eq!(mined.txs(), &[other]);
}

#[test]
fn inbound_block_aborts_mining_in_progress() {
    // An all-zero target cannot be met, so only an abort ends the search.
    let (node, _) = recording_node(64);
    send_tx(&node, &Transaction::new("A", "B", Amount::whole(1)));

    let miner = {
        let node = node.clone();
        thread::spawn(move || node.mine_next())
    };
    let genesis = Block::genesis().to_json();
    let finished = wait_until(Duration::from_secs(10), || {
        // A duplicate is accepted as a no-op but still interrupts the miner.
        node.handle_incoming_message(MessageKind::Block, &genesis)
            .unwrap();
        miner.is_finished()
    });
    assert!(finished, "miner did not observe the abort");
    assert!(matches!(miner.join().unwrap(), MiningOutcome::Aborted));
    assert_eq!(node.chain_len(), 1);
    assert_eq!(node.pending().len(), 1);
}

#[test]
fn reorganization_requeues_displaced_transactions() {
    let (node, _) = recording_node(1);
    let mine_me = Transaction::with_timestamp("A", "B", Amount::whole(1), 1);
    send_tx(&node, &mine_me);
    let MiningOutcome::Mined(ours) = node.mine_next() else {
        panic!("expected a mined block");
    };

    let theirs_1 = mine_on(
        &Block::genesis(),
        vec![Transaction::with_timestamp("C", "D", Amount::whole(1), 2)],
        1,
        ours.created_at() + 1,
    );
    let theirs_2 = mine_on(
        &theirs_1,
        vec![Transaction::with_timestamp("D", "C", Amount::whole(3), 3)],
        1,
        ours.created_at() + 2,
    );

    // Child first: it waits as an orphan until its parent arrives.
    node.handle_incoming_message(MessageKind::Block, &theirs_2.to_json())
        .unwrap();
    assert_eq!(node.blocks()[1], ours);
    node.handle_incoming_message(MessageKind::Block, &theirs_1.to_json())
        .unwrap();

    assert_eq!(node.blocks(), vec![Block::genesis(), theirs_1, theirs_2]);
    assert_eq!(node.pending(), vec![mine_me]);
    assert_eq!(node.balance_of("A"), Amount::whole(10));
    assert_eq!(node.balance_of("C"), Amount::whole(12));
    assert_eq!(node.balance_of("D"), Amount::whole(8));
}

#[test]
fn two_nodes_converge_over_local_network() {
    let network = Arc::new(LocalNetwork::new());
    let open = |id: &str, peer: &str| {
        Node::open(
            config(id, &[peer], 1),
            Arc::new(MemoryStore::new()),
            &abcd(),
            network.clone(),
        )
        .unwrap()
    };
    let a = open("a", "b");
    let b = open("b", "a");
    let listeners = [
        a.spawn_listener(network.register("a")).unwrap(),
        b.spawn_listener(network.register("b")).unwrap(),
    ];

    let tx = Transaction::new("A", "D", Amount::from_minor(250));
    assert!(a.submit_transaction(tx.clone()));
    assert!(wait_until(Duration::from_secs(5), || b.pending().len() == 1));

    let MiningOutcome::Mined(block) = a.mine_next() else {
        panic!("expected a mined block");
    };
    assert!(wait_until(Duration::from_secs(5), || b.chain_len() == 2));
    assert_eq!(b.blocks(), a.blocks());
    assert_eq!(b.blocks()[1], block);
    assert!(b.pending().is_empty());
    assert_eq!(b.balance_of("D"), Amount::from_minor(1_250));
    assert!(matches!(b.mine_next(), MiningOutcome::Idle));

    network.shutdown();
    for handle in listeners {
        handle.join().unwrap();
    }
}

#[test]
fn miner_thread_mines_then_stops() {
    let (node, _) = recording_node(1);
    let miner = node.spawn_miner().unwrap();
    node.submit_transaction(Transaction::new("B", "C", Amount::whole(3)));
    assert!(wait_until(Duration::from_secs(10), || node.chain_len() == 2));

    node.stop();
    miner.join().unwrap();
    assert!(node.is_stopped());
    assert!(!node.wait_for_work());
    assert_eq!(node.balance_of("C"), Amount::whole(13));
}

#[test]
fn node_state_survives_restart() {
    let dir = tempdir().unwrap();
    let recorder: Arc<dyn Messenger> = Arc::new(Recorder::default());
    let tip: Hash = {
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let node = Node::open(config("n0", &[], 1), store, &abcd(), recorder.clone()).unwrap();
        send_tx(&node, &Transaction::new("A", "C", Amount::whole(4)));
        assert!(matches!(node.mine_next(), MiningOutcome::Mined(_)));
        node.close().unwrap();
        node.status().tip_hash
    };

    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let node = Node::open(config("n0", &[], 1), store, &abcd(), recorder).unwrap();
    let status = node.status();
    assert_eq!(status.height, 1);
    assert_eq!(status.tip_hash, tip);
    assert_eq!(node.balance_of("A"), Amount::whole(6));
    assert_eq!(node.balance_of("C"), Amount::whole(14));
}
