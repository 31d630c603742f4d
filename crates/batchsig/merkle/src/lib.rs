//! Batchsig Merkle accumulator
//!
//! Roots depend only on the multiset of entries: entries are hashed with
//! keccak256, the leaf hashes are sorted ascending, and the sorted level is
//! folded pairwise bottom-up with sorted-pair hashing
//! (`parent = keccak256(min(l, r) ‖ max(l, r))`). A node without a sibling is
//! promoted to the next level unchanged.
//!
//! ```text
//!            root
//!          /      \
//!       h(a,b)     e        <- odd node promoted
//!       /   \      |
//!      a     b     e        <- leaves, sorted
//! ```
//!
//! Because sibling order never matters, a proof is just the list of sibling
//! hashes from the leaf up to the root.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod tree;

pub use tree::MerkleTree;

use alloy_primitives::{keccak256, B256, KECCAK256_EMPTY};
use thiserror::Error;

/// Root of an empty tree, `keccak256([])`.
pub const EMPTY_ROOT: B256 = KECCAK256_EMPTY;

/// Merkle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// Entry index past the end of the entry list
    #[error("entry index {index} out of bounds for {len} entries")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of entries
        len: usize,
    },
}

/// Leaf hash of a raw entry
pub fn hash_leaf(entry: &[u8]) -> B256 {
    keccak256(entry)
}

/// Sorted-pair hash of two nodes
pub fn hash_pair(a: B256, b: B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(lo.as_slice());
    data[32..].copy_from_slice(hi.as_slice());
    keccak256(data)
}

/// Root over raw entries.
pub fn root_from_entries<I>(entries: I) -> B256
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    MerkleTree::from_entries(entries).root()
}

/// Root over already-hashed leaves; `None` stands for an empty leaf and is
/// replaced by [`EMPTY_ROOT`].
pub fn root_from_leaves<I>(leaves: I) -> B256
where
    I: IntoIterator<Item = Option<B256>>,
{
    MerkleTree::from_leaves(leaves).root()
}

/// Chain the previous root and the current root into a super-root.
pub fn chain_roots(previous: Option<B256>, current: B256) -> B256 {
    root_from_leaves([previous, Some(current)])
}

/// Inclusion proof for `entries[index]`.
pub fn generate_proof<T: AsRef<[u8]>>(entries: &[T], index: usize) -> Result<Vec<B256>, MerkleError> {
    let entry = entries
        .get(index)
        .ok_or(MerkleError::IndexOutOfBounds { index, len: entries.len() })?;
    let tree = MerkleTree::from_entries(entries);
    let leaf = hash_leaf(entry.as_ref());
    // the leaf is in the tree since it was built from the same entries
    Ok(tree.proof_for_leaf(leaf).unwrap_or_default())
}

/// Check that `entry` is committed under `root`.
pub fn verify_proof(proof: &[B256], root: B256, entry: &[u8]) -> bool {
    verify_leaf_proof(proof, root, hash_leaf(entry))
}

/// Check that an already-hashed `leaf` is committed under `root`.
pub fn verify_leaf_proof(proof: &[B256], root: B256, leaf: B256) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling)) == root
}
