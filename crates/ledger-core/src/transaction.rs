use std::{
    fmt,
    hash::{Hash as StdHash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::{error::ChainError, now_millis, sha256, Amount, Hash};

pub type TxId = Hash;

/// A transfer of `amount` from one named account to another.
///
/// The id is the SHA-256 of the other four fields and is the transaction's
/// identity: two transactions are equal iff their ids are.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    from: String,
    to: String,
    amount: Amount,
    created_at: u64,
    id: TxId,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: Amount) -> Self {
        Self::with_timestamp(from, to, amount, now_millis())
    }

    pub fn with_timestamp(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: Amount,
        created_at: u64,
    ) -> Self {
        let mut tx = Self {
            from: from.into(),
            to: to.into(),
            amount,
            created_at,
            id: [0u8; 32],
        };
        tx.id = tx.compute_id();
        tx
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.from.len() + 4 + self.to.len() + 8 + 8);
        bytes.extend_from_slice(&(self.from.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.from.as_bytes());
        bytes.extend_from_slice(&(self.to.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.to.as_bytes());
        bytes.extend_from_slice(&self.amount.minor().to_le_bytes());
        bytes.extend_from_slice(&self.created_at.to_le_bytes());
        bytes
    }

    /// Recompute the content hash, ignoring the stored id.
    pub fn compute_id(&self) -> TxId {
        sha256(&self.hash_bytes())
    }

    pub fn has_valid_id(&self) -> bool {
        self.compute_id() == self.id
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings and integers; serde_json cannot fail on it.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a transaction received from a peer, rejecting a forged id.
    pub fn from_json(s: &str) -> Result<Self, ChainError> {
        let tx: Transaction =
            serde_json::from_str(s).map_err(|e| ChainError::MalformedInput(e.to_string()))?;
        if !tx.has_valid_id() {
            return Err(ChainError::MalformedInput(format!(
                "transaction id {} does not match its contents",
                hex::encode(tx.id)
            )));
        }
        Ok(tx)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl StdHash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {} [{}]",
            self.from,
            self.to,
            self.amount,
            &hex::encode(self.id)[..8]
        )
    }
}
