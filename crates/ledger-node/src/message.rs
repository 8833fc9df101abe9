use std::fmt;

use serde::{Deserialize, Serialize};

/// The two kinds of gossip exchanged between nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Transaction,
    Block,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Transaction => f.write_str("transaction"),
            MessageKind::Block => f.write_str("block"),
        }
    }
}

/// Wire envelope. `contents` is the JSON of the transaction or block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub contents: String,
}

impl Message {
    pub fn new(kind: MessageKind, contents: impl Into<String>) -> Self {
        Self {
            kind,
            contents: contents.into(),
        }
    }
}
