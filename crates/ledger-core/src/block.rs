use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    constants::GENESIS_HASH, error::ChainError, merkle_root, pow::Target, sha256, Hash,
    Transaction, TxId,
};

/// The fields a block hash commits to, borrowed from either a candidate or
/// a finalized block. Hashing never needs to touch the live `hash` field.
struct Preimage<'a> {
    index: u64,
    previous_hash: &'a Hash,
    created_at: u64,
    nonce: u64,
    merkle_root: &'a Hash,
}

impl Preimage<'_> {
    fn bytes(&self) -> [u8; 88] {
        let mut bytes = [0u8; 88];
        bytes[0..8].copy_from_slice(&self.index.to_le_bytes());
        bytes[8..40].copy_from_slice(self.previous_hash);
        bytes[40..48].copy_from_slice(&self.created_at.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.nonce.to_le_bytes());
        bytes[56..88].copy_from_slice(self.merkle_root);
        bytes
    }

    fn hash(&self) -> Hash {
        sha256(&self.bytes())
    }
}

/// Merkle root over the recomputed ids, so a block cannot vouch for
/// transactions whose stored id was tampered with.
fn transactions_root(txs: &[Transaction]) -> Hash {
    let ids: Vec<TxId> = txs.iter().map(Transaction::compute_id).collect();
    merkle_root(&ids)
}

/// A block under construction. Only the nonce changes while mining.
#[derive(Clone, Debug)]
pub struct Candidate {
    index: u64,
    previous_hash: Hash,
    created_at: u64,
    pub nonce: u64,
    txs: Vec<Transaction>,
    merkle_root: Hash,
}

impl Candidate {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.previous_hash
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    fn preimage(&self, nonce: u64) -> Preimage<'_> {
        Preimage {
            index: self.index,
            previous_hash: &self.previous_hash,
            created_at: self.created_at,
            nonce,
            merkle_root: &self.merkle_root,
        }
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> Hash {
        self.preimage(nonce).hash()
    }

    pub fn compute_hash(&self) -> Hash {
        self.hash_with_nonce(self.nonce)
    }

    /// Seal the candidate at its current nonce.
    pub fn finalize(self) -> Block {
        let hash = self.compute_hash();
        self.seal(hash)
    }

    pub(crate) fn seal(self, hash: Hash) -> Block {
        Block {
            index: self.index,
            previous_hash: self.previous_hash,
            created_at: self.created_at,
            nonce: self.nonce,
            txs: self.txs,
            hash,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    previous_hash: Hash,
    created_at: u64,
    nonce: u64,
    txs: Vec<Transaction>,
    hash: Hash,
}

impl Block {
    pub fn construct(
        index: u64,
        previous_hash: Hash,
        created_at: u64,
        nonce: u64,
        txs: Vec<Transaction>,
    ) -> Candidate {
        let merkle_root = transactions_root(&txs);
        Candidate {
            index,
            previous_hash,
            created_at,
            nonce,
            txs,
            merkle_root,
        }
    }

    /// The fixed first block every node starts from. Its hash is predetermined
    /// rather than mined.
    pub fn genesis() -> Block {
        Block {
            index: 0,
            previous_hash: [0u8; 32],
            created_at: 0,
            nonce: 0,
            txs: vec![],
            hash: GENESIS_HASH,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.previous_hash
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.hash == GENESIS_HASH
    }

    /// Recompute the content hash from every field except the stored hash.
    pub fn compute_hash(&self) -> Hash {
        let merkle_root = transactions_root(&self.txs);
        Preimage {
            index: self.index,
            previous_hash: &self.previous_hash,
            created_at: self.created_at,
            nonce: self.nonce,
            merkle_root: &merkle_root,
        }
        .hash()
    }

    /// True iff the stored hash is reproduced by the contents and does not
    /// exceed `target`.
    pub fn verify_proof_of_work(&self, target: &Target) -> bool {
        self.compute_hash() == self.hash && target.is_met_by(&self.hash)
    }

    /// Structural checks that need no chain context: every transaction id
    /// matches its contents and no id repeats.
    pub fn check_transactions(&self) -> Result<(), ChainError> {
        let mut seen = HashSet::with_capacity(self.txs.len());
        for tx in &self.txs {
            if !tx.has_valid_id() {
                return Err(ChainError::MalformedInput(format!(
                    "block {} carries transaction with forged id {}",
                    self.index,
                    hex::encode(tx.id())
                )));
            }
            if !seen.insert(tx.id()) {
                return Err(ChainError::MalformedInput(format!(
                    "block {} repeats transaction {}",
                    self.index,
                    hex::encode(tx.id())
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(s: &str) -> Result<Self, ChainError> {
        let block: Block =
            serde_json::from_str(s).map_err(|e| ChainError::MalformedInput(e.to_string()))?;
        block.check_transactions()?;
        Ok(block)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "index: {}", self.index)?;
        writeln!(f, "hash: {}", hex::encode(self.hash))?;
        writeln!(f, "previous_hash: {}", hex::encode(self.previous_hash))?;
        writeln!(f, "created_at: {}", self.created_at)?;
        writeln!(f, "nonce: {}", self.nonce)?;
        writeln!(f, "transactions:")?;
        for tx in &self.txs {
            writeln!(f, "\t{tx}")?;
        }
        Ok(())
    }
}
