//! A proof-of-work ledger node: pending transactions, the mining loop and
//! the message handling that keeps it in step with its peers.
pub mod config;
pub(crate) mod constants;
pub mod generator;
pub mod mempool;
pub mod message;
pub mod messenger;
pub mod node;
pub mod server;

pub use config::{MiningConfig, NodeConfig};
pub use message::{Message, MessageKind};
pub use messenger::{HttpMessenger, LocalNetwork, Messenger};
pub use node::{MiningOutcome, Node, NodeError, NodeStatus};
