use crate::{
    block::{Block, Candidate},
    pow::{count_leading_zero_bits, AbortSignal, Target},
};
use rayon::prelude::*;
use tracing::debug;

/// Searches nonces in parallel, starting at the candidate's nonce, until a hash
/// meets `target`. Every worker polls `abort` before each attempt; if it is
/// raised the search stops and `None` is returned.
pub fn hash_block_parallel(
    mut candidate: Candidate,
    target: &Target,
    abort: &AbortSignal,
) -> Option<Block> {
    let start = candidate.nonce;

    // Rayon splits the range across threads. `Some(None)` short-circuits on abort.
    let found = (start..u64::MAX)
        .into_par_iter()
        .find_map_any(|nonce| {
            if abort.is_raised() {
                return Some(None);
            }
            let hash = candidate.hash_with_nonce(nonce);
            target.is_met_by(&hash).then_some(Some((nonce, hash)))
        })
        .flatten();

    let (nonce, hash) = found?;
    candidate.nonce = nonce;
    debug!(
        index = candidate.index(),
        nonce,
        zero_bits = count_leading_zero_bits(&hash),
        "parallel search found nonce"
    );
    Some(candidate.seal(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::GENESIS_HASH, Amount, Transaction};

    #[test]
    fn parallel_search_meets_target() {
        let txs = vec![Transaction::with_timestamp("Alice", "Bob", Amount::whole(1), 1)];
        let target = Target::from_leading_zero_bits(14);
        let candidate = Block::construct(1, GENESIS_HASH, 1_600_000_200_000, 0, txs);
        let block = hash_block_parallel(candidate, &target, &AbortSignal::new()).unwrap();
        assert!(block.verify_proof_of_work(&target));
    }

    #[test]
    fn parallel_search_honours_abort() {
        let abort = AbortSignal::new();
        abort.raise();
        let candidate = Block::construct(1, GENESIS_HASH, 0, 0, vec![]);
        assert!(hash_block_parallel(candidate, &Target::max(), &abort).is_none());
    }
}
