//! Balanced binary Merkle tree over lexicographically sorted leaf hashes.
//!
//! Sorting before building decouples the root from insertion order: the
//! same set of events always yields the same root across nodes, which is
//! what makes the root eligible for inclusion in a future header field.

use sha2::{Digest, Sha256};

#[derive(Default, Clone)]
pub struct MerkleTree {
    /// Sorted leaf hashes.
    leaves: Vec<Vec<u8>>,
    /// `levels[0]` is the (sorted) leaf layer, `levels.last()` is the root.
    levels: Vec<Vec<Vec<u8>>>,
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

impl MerkleTree {
    pub fn build(mut hashes: Vec<Vec<u8>>) -> Self {
        if hashes.is_empty() {
            return MerkleTree::default();
        }
        hashes.sort();

        let mut levels = vec![hashes.clone()];
        let mut current = hashes.clone();
        while current.len() > 1 {
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(hash_pair(&pair[0], right));
            }
            levels.push(next.clone());
            current = next;
        }
        MerkleTree { leaves: hashes, levels }
    }

    pub fn root(&self) -> Option<Vec<u8>> {
        self.levels.last().and_then(|l| l.first()).cloned()
    }

    pub fn contains(&self, leaf: &[u8]) -> bool {
        self.leaves.binary_search_by(|l| l.as_slice().cmp(leaf)).is_ok()
    }

    /// Sibling hashes along the path from `leaf` to the root, bottom-up.
    pub fn proof_for(&self, leaf: &[u8]) -> Option<Vec<Vec<u8>>> {
        let mut idx = self.leaves.binary_search_by(|l| l.as_slice().cmp(leaf)).ok()?;
        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            proof.push(sibling.clone());
            idx /= 2;
        }
        Some(proof)
    }

    /// Recomputes a root from `leaf` and a proof path, used to verify
    /// soundness independent of the tree's own cached root.
    pub fn recompute_root(&self, leaf: &[u8], proof: &[Vec<u8>]) -> Vec<u8> {
        let mut idx = self.leaves.binary_search_by(|l| l.as_slice().cmp(leaf)).unwrap_or(0);
        let mut acc = leaf.to_vec();
        for sibling in proof {
            acc = if idx % 2 == 0 { hash_pair(&acc, sibling) } else { hash_pair(sibling, &acc) };
            idx /= 2;
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_stable_under_insertion_order_permutation() {
        let hashes = vec![vec![1u8], vec![2u8], vec![3u8]];
        let t1 = MerkleTree::build(hashes.clone());
        let mut reordered = hashes;
        reordered.reverse();
        let t2 = MerkleTree::build(reordered);
        assert_eq!(t1.root(), t2.root());
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let hashes = vec![vec![1u8], vec![2u8], vec![3u8]];
        let tree = MerkleTree::build(hashes);
        assert!(tree.root().is_some());
    }
}
