use std::path::PathBuf;

use clap::Args;
use ledger_core::{
    constants::{GENESIS_ACCOUNTS, POW_TARGET_DIFFICULTY},
    pow::Target,
    Amount, Genesis,
};

use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_LISTEN, DEFAULT_SIM_NODES, DEFAULT_SIM_SECONDS, DEFAULT_TX_INTERVAL_MS,
};

/// How a node searches for proof of work. Fixed for the node's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiningConfig {
    /// Leading zero hex digits a block hash needs.
    pub difficulty: u32,
    /// Spread the nonce search over the rayon thread pool.
    pub parallel: bool,
}

impl MiningConfig {
    pub fn target(&self) -> Target {
        Target::from_leading_zero_digits(self.difficulty)
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            parallel: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub id: String,
    /// Peer addresses handed to the messenger as-is.
    pub peers: Vec<String>,
    pub mining: MiningConfig,
}

/// Chain parameters shared by every node of a network.
#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Leading zero hex digits required of a block hash
    #[arg(long, default_value_t = POW_TARGET_DIFFICULTY)]
    pub difficulty: u32,

    /// Search nonces on all cores
    #[arg(long)]
    pub parallel: bool,

    /// Accounts endowed at genesis
    #[arg(long, value_delimiter = ',', default_values_t = GENESIS_ACCOUNTS.map(String::from))]
    pub accounts: Vec<String>,

    /// Genesis balance of each account, e.g. 10 or 2.50
    #[arg(long, default_value = "10")]
    pub initial_balance: Amount,
}

impl ChainArgs {
    pub fn genesis(&self) -> Genesis {
        Genesis::uniform(self.accounts.iter().cloned(), self.initial_balance)
    }

    pub fn mining(&self) -> MiningConfig {
        MiningConfig {
            difficulty: self.difficulty,
            parallel: self.parallel,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Identity of this node; also names its data directory
    #[arg(long, default_value = "node0")]
    pub id: String,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Base URL of a peer (repeatable), e.g. http://127.0.0.1:8081
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Data directory for sled
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub chain: ChainArgs,
}

impl RunArgs {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            id: self.id.clone(),
            peers: self.peers.clone(),
            mining: self.chain.mining(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of nodes to run
    #[arg(long, default_value_t = DEFAULT_SIM_NODES)]
    pub nodes: usize,

    /// How long to run before stopping
    #[arg(long, default_value_t = DEFAULT_SIM_SECONDS)]
    pub seconds: u64,

    /// Pause between generated transactions
    #[arg(long, default_value_t = DEFAULT_TX_INTERVAL_MS)]
    pub tx_interval_ms: u64,

    /// Seed for the transaction generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Data directory; each node gets a subdirectory
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub chain: ChainArgs,
}
