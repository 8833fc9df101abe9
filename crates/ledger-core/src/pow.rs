use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    block::{Block, Candidate},
    constants::{HASH_BITS, HASH_SIZE},
    Hash,
};

/// Ceiling a block hash, read as a big-endian 256-bit integer, must not exceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target(Hash);

impl Target {
    pub fn max() -> Self {
        Self([0xff; HASH_SIZE])
    }

    /// `bits` leading zero bits followed by ones.
    pub fn from_leading_zero_bits(bits: u32) -> Self {
        let bits = bits.min(HASH_BITS) as usize;
        let mut t = [0xffu8; HASH_SIZE];
        for (i, byte) in t.iter_mut().enumerate() {
            let start = i * 8;
            if start + 8 <= bits {
                *byte = 0;
            } else if start < bits {
                *byte = 0xff >> (bits - start);
            }
        }
        Self(t)
    }

    /// `digits` leading zero hex digits, e.g. 3 gives `000fff..ff`.
    pub fn from_leading_zero_digits(digits: u32) -> Self {
        Self::from_leading_zero_bits(digits.saturating_mul(4))
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn is_met_by(&self, hash: &Hash) -> bool {
        // Lexicographic order on big-endian bytes is numeric order.
        hash <= &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Cooperative cancellation token shared between a mining computation and
/// whoever may invalidate it.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Increment the candidate's nonce until its hash meets `target`.
///
/// `abort` is checked before every attempt; once raised the partial work is
/// dropped and `None` is returned.
pub fn hash_block(mut candidate: Candidate, target: &Target, abort: &AbortSignal) -> Option<Block> {
    loop {
        if abort.is_raised() {
            return None;
        }
        let hash = candidate.compute_hash();
        if target.is_met_by(&hash) {
            return Some(candidate.seal(hash));
        }
        candidate.nonce = candidate.nonce.wrapping_add(1);
    }
}

pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 8;
        } else {
            total += b.leading_zeros();
            break;
        }
    }
    total
}
