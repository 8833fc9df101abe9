//! Durable backends for `ledger_core::ChainStore`.
pub mod sled_store;

pub use sled_store::SledStore;
