use std::fs;

use ledger_core::{Amount, Block, ChainEntry, Snapshot, Transaction};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(db_path.to_str().unwrap()).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn snapshot(pairs: &[(&str, u64)]) -> Snapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Amount::whole(*v)))
        .collect()
}

/// A linked run of `count` entries after `parent`, each moving one coin from
/// A to B. Hashes are not mined; the store does not check proof of work.
pub fn entries_after(parent: &Block, count: u64, salt: u64) -> Vec<ChainEntry> {
    let mut out = Vec::new();
    let mut prev = parent.clone();
    for i in 0..count {
        let index = prev.index() + 1;
        let tx = Transaction::with_timestamp("A", "B", Amount::whole(1), salt * 1_000 + i);
        let block = Block::construct(index, *prev.hash(), salt + i, 0, vec![tx]).finalize();
        out.push(ChainEntry {
            block: block.clone(),
            snapshot: snapshot(&[("A", 100 - index), ("B", index)]),
        });
        prev = block;
    }
    out
}

pub fn genesis_entry() -> ChainEntry {
    ChainEntry {
        block: Block::genesis(),
        snapshot: snapshot(&[("A", 100), ("B", 0)]),
    }
}
