use std::collections::BTreeSet;

use thiserror::Error;

use crate::TxId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no balance snapshot precedes index {index} (ledger holds {len})")]
    OutOfRange { index: u64, len: u64 },

    #[error("{} transaction(s) would overdraw an account", .offending.len())]
    NegativeBalance { offending: BTreeSet<TxId> },

    #[error("balance of {account} overflows")]
    Overflow { account: String },

    #[error("transaction {} is already in the chain", hex::encode(.id))]
    Replay { id: TxId },
}

impl LedgerError {
    /// Ids of the transactions responsible for the failure, if any.
    pub fn offending(&self) -> Option<&BTreeSet<TxId>> {
        match self {
            LedgerError::NegativeBalance { offending } => Some(offending),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid proof of work for block {index}")]
    InvalidProofOfWork { index: u64 },

    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(#[from] LedgerError),

    #[error("orphan gap below index {index}: parent {missing} is unknown")]
    OrphanGap { index: u64, missing: String },

    #[error("persistence failure: {0:#}")]
    PersistenceFailure(#[source] anyhow::Error),
}
