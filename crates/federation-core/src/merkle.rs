//! Binary SHA-256 Merkle tree
//!
//! Two replicas holding the same ordered block sequence produce the same root
//! hash, so comparing roots is a cheap equality pre-check before any payload
//! is exchanged. Odd-width levels duplicate their last node.

use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` holds leaf hashes, the last level holds the root
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new<B: AsRef<[u8]>>(blocks: &[B]) -> Self {
        if blocks.is_empty() {
            return Self { levels: Vec::new() };
        }

        let leaves: Vec<Hash> = blocks
            .iter()
            .map(|block| Sha256::digest(block.as_ref()).into())
            .collect();

        let mut levels = vec![leaves];
        while levels.last().map_or(false, |level| level.len() > 1) {
            let below = &levels[levels.len() - 1];
            let parents = below
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    combine(left, right)
                })
                .collect();
            levels.push(parents);
        }

        Self { levels }
    }

    /// Root hash; all zeros for an empty tree
    pub fn root_hash(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0; 32])
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root_hash())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Indices of leaves that differ from `other`.
    ///
    /// Descends only into subtrees whose hashes differ. Trees of different
    /// widths are not comparable position by position, so every index of the
    /// wider tree is reported.
    pub fn diff(&self, other: &MerkleTree) -> Vec<usize> {
        if self.leaf_count() != other.leaf_count() {
            return (0..self.leaf_count().max(other.leaf_count())).collect();
        }
        if self.root_hash() == other.root_hash() {
            return Vec::new();
        }

        let mut frontier = vec![0usize];
        for depth in (0..self.levels.len() - 1).rev() {
            let width = self.levels[depth].len();
            frontier = frontier
                .into_iter()
                .flat_map(|i| [2 * i, 2 * i + 1])
                .filter(|&i| i < width && self.levels[depth][i] != other.levels[depth][i])
                .collect();
        }
        frontier
    }
}

fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new::<&[u8]>(&[]);
        assert_eq!(tree.root_hash(), [0; 32]);
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn test_single_block_root_is_leaf_hash() {
        let tree = MerkleTree::new(&[b"block"]);
        let expected: Hash = Sha256::digest(b"block").into();
        assert_eq!(tree.root_hash(), expected);
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let three = MerkleTree::new(&[b"a", b"b", b"c"]);
        let four = MerkleTree::new(&[b"a", b"b", b"c", b"c"]);
        assert_eq!(three.root_hash(), four.root_hash());
    }

    #[test]
    fn test_identical_blocks_identical_root() {
        let blocks = vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()];
        let left = MerkleTree::new(&blocks);
        let right = MerkleTree::new(&blocks);
        assert_eq!(left.root_hash(), right.root_hash());
        assert!(left.diff(&right).is_empty());

        let reordered = MerkleTree::new(&[b"y".to_vec(), b"x".to_vec(), b"z".to_vec()]);
        assert_ne!(left.root_hash(), reordered.root_hash());
    }

    #[test]
    fn test_diff_finds_changed_leaves() {
        let left = MerkleTree::new(&[b"a", b"b", b"c", b"d", b"e"]);
        let right = MerkleTree::new(&[b"a", b"B", b"c", b"d", b"E"]);
        assert_eq!(left.diff(&right), vec![1, 4]);
    }
}
