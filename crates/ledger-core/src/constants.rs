pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_BITS: u32 = (HASH_SIZE * BYTE) as u32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;

/// Leading zero hex digits required by default (four bits each).
pub const POW_TARGET_DIFFICULTY: u32 = 3;

/// Minor units per whole coin; amounts carry two decimal places.
pub const AMOUNT_SCALE: u64 = 100;

pub const GENESIS_ACCOUNTS: [&str; 4] = ["node0", "node1", "node2", "node3"];
pub const GENESIS_BALANCE: u64 = 10;
pub const GENESIS_HASH: [u8; HASH_SIZE] = {
    let mut h = [0u8; HASH_SIZE];
    h[HASH_SIZE - 1] = 0x0f;
    h
};

pub const MAX_ORPHANS: usize = 256;
/// Orphans this many positions or more behind the tip are pruned.
pub const ORPHAN_DEPTH: u64 = 16;
