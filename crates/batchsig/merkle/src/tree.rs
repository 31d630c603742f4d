use alloy_primitives::B256;

use crate::{hash_leaf, hash_pair, EMPTY_ROOT};

/// A fully materialized sorted-pair Merkle tree.
///
/// `levels[0]` holds the sorted leaves, the last level holds the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<B256>>,
}

impl MerkleTree {
    /// Build from raw entries (hashed with keccak256 first).
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Self::build(entries.into_iter().map(|entry| hash_leaf(entry.as_ref())).collect())
    }

    /// Build from already-hashed leaves; empty leaves become [`EMPTY_ROOT`].
    pub fn from_leaves<I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = Option<B256>>,
    {
        Self::build(leaves.into_iter().map(|leaf| leaf.unwrap_or(EMPTY_ROOT)).collect())
    }

    fn build(mut leaves: Vec<B256>) -> Self {
        leaves.sort_unstable();
        let mut levels = vec![leaves];

        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(*left, *right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root of the tree, [`EMPTY_ROOT`] when there are no leaves.
    pub fn root(&self) -> B256 {
        self.levels.last().and_then(|level| level.first()).copied().unwrap_or(EMPTY_ROOT)
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Whether the tree has no leaves
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted leaf hashes
    pub fn leaves(&self) -> &[B256] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Sibling path of the leaf at `position` in sorted order.
    pub fn proof(&self, position: usize) -> Option<Vec<B256>> {
        if position >= self.len() {
            return None;
        }

        let mut proof = Vec::with_capacity(self.levels.len());
        let mut index = position;
        for level in &self.levels[..self.levels.len() - 1] {
            if let Some(sibling) = level.get(index ^ 1) {
                proof.push(*sibling);
            }
            index /= 2;
        }
        Some(proof)
    }

    /// Sibling path of `leaf`, if it is in the tree.
    pub fn proof_for_leaf(&self, leaf: B256) -> Option<Vec<B256>> {
        let position = self.leaves().binary_search(&leaf).ok()?;
        self.proof(position)
    }

    /// Sibling path of a raw entry, if it is in the tree.
    pub fn proof_for_entry(&self, entry: &[u8]) -> Option<Vec<B256>> {
        self.proof_for_leaf(hash_leaf(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify_leaf_proof;

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_leaves([]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), EMPTY_ROOT);
        assert_eq!(tree.proof(0), None);
    }

    #[test]
    fn test_every_leaf_has_valid_proof() {
        for n in 1..=9u8 {
            let tree = MerkleTree::from_entries((0..n).map(|i| [i]));
            assert_eq!(tree.len(), n as usize);
            for (position, leaf) in tree.leaves().iter().enumerate() {
                let proof = tree.proof(position).unwrap();
                assert!(verify_leaf_proof(&proof, tree.root(), *leaf), "n={n} position={position}");
            }
        }
    }

    #[test]
    fn test_proof_for_missing_entry() {
        let tree = MerkleTree::from_entries([b"a", b"b"]);
        assert!(tree.proof_for_entry(b"a").is_some());
        assert!(tree.proof_for_entry(b"c").is_none());
    }
}
