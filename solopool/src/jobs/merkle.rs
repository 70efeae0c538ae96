//! Merkle branches for coinbase-rolling jobs.
//!
//! Miners never see the full transaction set; they receive the list of
//! sibling hashes the coinbase txid combines with on its way up the merkle
//! tree. Rolling extranonce2 changes the coinbase txid, and the branches let
//! the miner recompute the root without the transactions themselves.

use bitcoin::Txid;
use bitcoin::hashes::Hash;

use crate::hashing::dsha256_pair;

/// Compute the merkle branches for an unknown coinbase.
///
/// `txids` is the template's transaction list in block order, excluding the
/// coinbase. At each tree level the coinbase-side node pairs with the first
/// remaining node (which becomes a branch entry) and the rest fold pairwise,
/// duplicating the last node at odd counts.
pub fn branches_for_coinbase(txids: &[Txid]) -> Vec<[u8; 32]> {
    let mut branches = Vec::new();
    let mut level: Vec<[u8; 32]> = txids.iter().map(|id| id.to_byte_array()).collect();

    while !level.is_empty() {
        branches.push(level[0]);

        let rest = &level[1..];
        let mut next = Vec::with_capacity(rest.len().div_ceil(2));
        for pair in rest.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(dsha256_pair(left, right));
        }
        level = next;
    }

    branches
}

/// Fold a coinbase txid through the branches to obtain the merkle root.
///
/// All values are in natural (little-endian) byte order; the Stratum wire
/// form of the result is obtained with `flip_32` by the caller.
pub fn fold(coinbase_txid: [u8; 32], branches: &[[u8; 32]]) -> [u8; 32] {
    branches
        .iter()
        .fold(coinbase_txid, |node, branch| dsha256_pair(&node, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    /// Reference implementation: the root of the full tree built from the
    /// complete transaction list (coinbase included).
    fn full_tree_root(txids: &[[u8; 32]]) -> [u8; 32] {
        let mut level = txids.to_vec();
        while level.len() > 1 {
            let mut next = Vec::new();
            for pair in level.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(dsha256_pair(left, right));
            }
            level = next;
        }
        level[0]
    }

    #[test]
    fn empty_template_has_no_branches() {
        assert_eq!(branches_for_coinbase(&[]), Vec::<[u8; 32]>::new());
        // Root of a coinbase-only block is the coinbase txid itself.
        assert_eq!(fold([7u8; 32], &[]), [7u8; 32]);
    }

    #[test]
    fn single_transaction_yields_one_branch() {
        let branches = branches_for_coinbase(&[txid(1)]);
        assert_eq!(branches, vec![[1u8; 32]]);
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(3)]
    #[test_case(4)]
    #[test_case(5)]
    #[test_case(7)]
    #[test_case(12)]
    fn folding_matches_full_tree(n: u8) {
        let txids: Vec<Txid> = (1..=n).map(txid).collect();
        let branches = branches_for_coinbase(&txids);

        // Branch count is logarithmic in the transaction count.
        let expected_depth = usize::BITS - (txids.len()).next_power_of_two().leading_zeros();
        assert!(branches.len() <= expected_depth as usize + 1);

        let coinbase = [0xccu8; 32];
        let folded = fold(coinbase, &branches);

        let mut all: Vec<[u8; 32]> = vec![coinbase];
        all.extend(txids.iter().map(|id| id.to_byte_array()));
        assert_eq!(folded, full_tree_root(&all));
    }

    #[test]
    fn branches_depend_on_every_transaction() {
        let a = branches_for_coinbase(&[txid(1), txid(2), txid(3)]);
        let b = branches_for_coinbase(&[txid(1), txid(2), txid(4)]);
        assert_ne!(fold([0u8; 32], &a), fold([0u8; 32], &b));
    }
}
