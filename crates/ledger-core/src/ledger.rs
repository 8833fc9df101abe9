use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{GENESIS_ACCOUNTS, GENESIS_BALANCE},
    error::LedgerError,
    Amount, Transaction,
};

/// Account balances after one block's transactions.
pub type Snapshot = BTreeMap<String, Amount>;

/// Initial endowment installed as snapshot 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub balances: Snapshot,
}

impl Genesis {
    pub fn uniform<I, S>(accounts: I, balance: Amount) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            balances: accounts.into_iter().map(|a| (a.into(), balance)).collect(),
        }
    }
}

impl Default for Genesis {
    fn default() -> Self {
        Self::uniform(GENESIS_ACCOUNTS, Amount::whole(GENESIS_BALANCE))
    }
}

/// One balance snapshot per chain index. Snapshot `i` is snapshot `i - 1`
/// with block `i`'s transactions applied, so the ledger can be rolled back to
/// any fork point and replayed forward.
#[derive(Clone, Debug)]
pub struct Ledger {
    snapshots: Vec<Snapshot>,
}

impl Ledger {
    pub fn new(genesis: &Genesis) -> Self {
        Self {
            snapshots: vec![genesis.balances.clone()],
        }
    }

    /// Rebuild from persisted snapshots. Returns `None` when there are none.
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Option<Self> {
        (!snapshots.is_empty()).then_some(Self { snapshots })
    }

    pub fn len(&self) -> u64 {
        self.snapshots.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshot(&self, index: u64) -> Option<&Snapshot> {
        self.snapshots.get(index as usize)
    }

    pub fn latest(&self) -> &Snapshot {
        // Never empty: construction always installs a genesis snapshot.
        &self.snapshots[self.snapshots.len() - 1]
    }

    /// The transition function: apply `txs` in order to `base`.
    ///
    /// Fails with every transaction whose sender ends up below zero, not just
    /// the first one found.
    pub fn apply(base: &Snapshot, txs: &[Transaction]) -> Result<Snapshot, LedgerError> {
        let mut working: BTreeMap<&str, i128> = base
            .iter()
            .map(|(k, v)| (k.as_str(), i128::from(v.minor())))
            .collect();
        for tx in txs {
            let amount = i128::from(tx.amount().minor());
            *working.entry(tx.from()).or_insert(0) -= amount;
            *working.entry(tx.to()).or_insert(0) += amount;
        }

        let overdrawn: BTreeSet<&str> = working
            .iter()
            .filter(|(_, v)| **v < 0)
            .map(|(k, _)| *k)
            .collect();
        if !overdrawn.is_empty() {
            let offending = txs
                .iter()
                .filter(|tx| overdrawn.contains(tx.from()))
                .map(Transaction::id)
                .collect();
            return Err(LedgerError::NegativeBalance { offending });
        }

        working
            .into_iter()
            .map(|(account, v)| {
                u64::try_from(v)
                    .map(|minor| (account.to_string(), Amount::from_minor(minor)))
                    .map_err(|_| LedgerError::Overflow {
                        account: account.to_string(),
                    })
            })
            .collect()
    }

    /// Build the candidate snapshot for `target_index` without touching the
    /// ledger.
    pub fn verify_transactions(
        &self,
        txs: &[Transaction],
        target_index: u64,
    ) -> Result<Snapshot, LedgerError> {
        let base = target_index
            .checked_sub(1)
            .and_then(|i| self.snapshot(i))
            .ok_or(LedgerError::OutOfRange {
                index: target_index,
                len: self.len(),
            })?;
        Self::apply(base, txs)
    }

    /// Install `snapshot` at `index`. Anything above `index` was derived from
    /// the replaced state and is discarded.
    pub fn commit_state(&mut self, snapshot: Snapshot, index: u64) -> Result<(), LedgerError> {
        if index == 0 || index > self.len() {
            return Err(LedgerError::OutOfRange {
                index,
                len: self.len(),
            });
        }
        self.snapshots.truncate(index as usize);
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.latest().get(account).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> Amount {
        self.latest().values().copied().sum()
    }
}
