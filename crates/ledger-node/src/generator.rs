use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::{ensure, Result};
use ledger_core::{Amount, Transaction};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    constants::{GEN_MAX_AMOUNT, GEN_MIN_AMOUNT},
    message::MessageKind,
    messenger::Messenger,
};

/// Produces random transfers between a fixed set of accounts.
pub struct TransactionGenerator {
    accounts: Vec<String>,
    rng: StdRng,
}

impl TransactionGenerator {
    pub fn new(accounts: Vec<String>, seed: Option<u64>) -> Result<Self> {
        ensure!(
            accounts.len() >= 2,
            "need at least two accounts to generate transfers"
        );
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { accounts, rng })
    }

    pub fn make_tx(&mut self) -> Transaction {
        let from = self.rng.gen_range(0..self.accounts.len());
        let mut to = self.rng.gen_range(0..self.accounts.len() - 1);
        if to >= from {
            to += 1;
        }
        let amount = Amount::from_minor(self.rng.gen_range(GEN_MIN_AMOUNT..=GEN_MAX_AMOUNT));
        Transaction::new(&self.accounts[from], &self.accounts[to], amount)
    }

    /// Send a fresh transaction every `interval` until `stop` is set. Each
    /// round one random node is left out so pending sets differ.
    pub fn run(
        &mut self,
        messenger: &dyn Messenger,
        nodes: &[String],
        interval: Duration,
        stop: &AtomicBool,
    ) {
        let mut sent = 0u64;
        while !stop.load(Ordering::SeqCst) {
            let tx = self.make_tx();
            let skipped = nodes.choose(&mut self.rng);
            let json = tx.to_json();
            for node in nodes.iter().filter(|n| Some(*n) != skipped || nodes.len() == 1) {
                if let Err(e) = messenger.send(MessageKind::Transaction, &json, node) {
                    debug!(%node, error = %e, "generator send failed");
                }
            }
            sent += 1;
            thread::sleep(interval);
        }
        info!(sent, "transaction generator stopped");
    }
}
