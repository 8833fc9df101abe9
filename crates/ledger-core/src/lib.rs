use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod amount;
pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod mine;
pub mod orphan;
pub mod pow;
pub mod store;
pub mod transaction;

pub use amount::Amount;
pub use block::{Block, Candidate};
pub use chain::{BlockChain, BlockOutcome, ChainUpdate};
pub use error::{ChainError, LedgerError};
pub use ledger::{Genesis, Ledger, Snapshot};
pub use store::{ChainEntry, ChainStore, MemoryStore};
pub use transaction::{Transaction, TxId};

pub type Hash = [u8; 32];

pub fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

/// Milliseconds since the Unix epoch; zero if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Pairwise SHA-256 root over `leaves`, duplicating the last node of an odd
/// level. An empty list yields the zero hash.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash> = leaves.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut hasher = Sha256::new();
            hasher.update(a);
            hasher.update(b);
            let digest = hasher.finalize();
            let mut out = [0u8; 32];
            out.copy_from_slice(&digest[..]);
            next.push(out);
        }
        level = next;
    }
    level[0]
}
