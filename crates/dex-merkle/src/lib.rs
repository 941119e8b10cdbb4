//! A depth-`D`, fan-out-`k` sparse Merkle tree over the scalar field.
//!
//! Every `State`/`AccountLeaf`/`BalanceLeaf` subtree in `dex-state` is one of
//! these, parameterized by its own depth and a fan-out of 4 (account and
//! balance subtrees) or, where the source's `numBitsKey` calls for a binary
//! tree, 2. The tree is represented the way `operator/sparse_merkle_tree.py`'s
//! `EphemDB` represents it: a content-addressed `hash -> children` table
//! rather than a depth-indexed array, so sharing identical subtrees (every
//! untouched branch of a freshly allocated tree) costs one entry instead of
//! `k^D`. Nothing is ever pruned — the caller controls memory by bounding how
//! many distinct trees it keeps alive (`StateStore` keeps exactly one).

use dex_field::Field;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("key {key} is out of range for a depth-{depth} fan-out-{fanout} tree")]
    KeyOutOfRange { key: u128, depth: u32, fanout: u32 },
    #[error("proof has {got} elements, expected {expected}")]
    WrongProofLength { got: usize, expected: usize },
}

/// A fixed-arity node hash, e.g. `dex_hash::hash_node4`.
pub type NodeHashFn = fn(&[Field]) -> Field;

/// Precomputed hash of an all-default subtree at each height, `0..=depth`.
/// `default_hashes[0]` is the default leaf hash; `default_hashes[depth]` is
/// the root of a tree that has never been touched.
fn default_hashes(depth: u32, fanout: u32, default_leaf: Field, node_hash: NodeHashFn) -> Vec<Field> {
    let mut hashes = Vec::with_capacity(depth as usize + 1);
    hashes.push(default_leaf);
    for _ in 0..depth {
        let children = vec![*hashes.last().unwrap(); fanout as usize];
        hashes.push(node_hash(&children));
    }
    hashes
}

fn digit_at(key: u128, height: u32, fanout: u32) -> usize {
    let divisor = (fanout as u128).pow(height - 1);
    ((key / divisor) % fanout as u128) as usize
}

pub struct SparseMerkleTree {
    depth: u32,
    fanout: u32,
    node_hash: NodeHashFn,
    default_hashes: Vec<Field>,
    nodes: HashMap<Field, Vec<Field>>,
    root: Field,
}

impl SparseMerkleTree {
    pub fn new(depth: u32, fanout: u32, default_leaf: Field, node_hash: NodeHashFn) -> Self {
        let default_hashes = default_hashes(depth, fanout, default_leaf, node_hash);
        let root = *default_hashes.last().unwrap();
        Self {
            depth,
            fanout,
            node_hash,
            default_hashes,
            nodes: HashMap::new(),
            root,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn fanout(&self) -> u32 {
        self.fanout
    }

    pub fn root(&self) -> Field {
        self.root
    }

    /// The full content-addressed node table, for snapshotting.
    pub fn nodes(&self) -> &HashMap<Field, Vec<Field>> {
        &self.nodes
    }

    /// Rebuild a tree from a previously-dumped node table and root, as read
    /// back from a state snapshot.
    pub fn from_parts(
        depth: u32,
        fanout: u32,
        default_leaf: Field,
        node_hash: NodeHashFn,
        root: Field,
        nodes: HashMap<Field, Vec<Field>>,
    ) -> Self {
        let default_hashes = default_hashes(depth, fanout, default_leaf, node_hash);
        Self {
            depth,
            fanout,
            node_hash,
            default_hashes,
            nodes,
            root,
        }
    }

    fn key_capacity(&self) -> u128 {
        (self.fanout as u128).pow(self.depth)
    }

    fn check_key(&self, key: u128) -> Result<(), MerkleError> {
        if key >= self.key_capacity() {
            return Err(MerkleError::KeyOutOfRange {
                key,
                depth: self.depth,
                fanout: self.fanout,
            });
        }
        Ok(())
    }

    fn children_of(&self, hash: Field, height: u32) -> Vec<Field> {
        if let Some(children) = self.nodes.get(&hash) {
            return children.clone();
        }
        vec![self.default_hashes[(height - 1) as usize]; self.fanout as usize]
    }

    /// Walk from the root to the leaf at `key`, returning the per-height
    /// `(children, chosen digit)` pairs in root-to-leaf order.
    fn walk(&self, key: u128) -> Vec<(Vec<Field>, usize)> {
        let mut current = self.root;
        let mut path = Vec::with_capacity(self.depth as usize);
        for height in (1..=self.depth).rev() {
            let children = self.children_of(current, height);
            let digit = digit_at(key, height, self.fanout);
            current = children[digit];
            path.push((children, digit));
        }
        path
    }

    /// The current leaf hash stored at `key`, or the default leaf hash if
    /// `key` has never been written.
    pub fn get(&self, key: u128) -> Result<Field, MerkleError> {
        self.check_key(key)?;
        let path = self.walk(key);
        Ok(path
            .last()
            .map(|(children, digit)| children[*digit])
            .unwrap_or(self.root))
    }

    /// Overwrite the leaf at `key` with `leaf_hash`, recomputing every
    /// ancestor up to a new root.
    pub fn update(&mut self, key: u128, leaf_hash: Field) -> Result<(), MerkleError> {
        self.check_key(key)?;
        let path = self.walk(key);

        let mut child_hash = leaf_hash;
        for (mut children, digit) in path.into_iter().rev() {
            children[digit] = child_hash;
            let new_hash = (self.node_hash)(&children);
            self.nodes.insert(new_hash, children);
            child_hash = new_hash;
        }
        self.root = child_hash;
        Ok(())
    }

    /// Sibling hashes for `key`, bottom-to-top, `(fanout - 1)` per level —
    /// length `depth * (fanout - 1)`, the order the witness consumer walks
    /// the path back up in.
    pub fn create_proof(&self, key: u128) -> Result<Vec<Field>, MerkleError> {
        self.check_key(key)?;
        let mut levels: Vec<Vec<Field>> = self
            .walk(key)
            .into_iter()
            .map(|(children, digit)| {
                children
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i != digit)
                    .map(|(_, v)| v)
                    .collect()
            })
            .collect();
        levels.reverse();
        Ok(levels.into_iter().flatten().collect())
    }
}

/// Recompute a root from a leaf hash and its sibling proof, without needing
/// a live tree. Used by tests to check a proof reproduces the expected root.
pub fn verify_proof(
    key: u128,
    leaf_hash: Field,
    proof: &[Field],
    depth: u32,
    fanout: u32,
    node_hash: NodeHashFn,
) -> Result<Field, MerkleError> {
    let expected_len = (depth * (fanout - 1)) as usize;
    if proof.len() != expected_len {
        return Err(MerkleError::WrongProofLength {
            got: proof.len(),
            expected: expected_len,
        });
    }

    let mut current = leaf_hash;
    let mut offset = 0usize;
    for height in 1..=depth {
        let digit = digit_at(key, height, fanout);
        let siblings = &proof[offset..offset + (fanout as usize - 1)];
        offset += fanout as usize - 1;

        let mut children = Vec::with_capacity(fanout as usize);
        let mut sib_iter = siblings.iter();
        for i in 0..fanout as usize {
            if i == digit {
                children.push(current);
            } else {
                children.push(*sib_iter.next().unwrap());
            }
        }
        current = node_hash(&children);
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_hash::hash_node4;

    fn empty_tree(depth: u32) -> SparseMerkleTree {
        SparseMerkleTree::new(depth, 4, Field::zero(), hash_node4)
    }

    #[test]
    fn fresh_tree_returns_default_leaf_everywhere() {
        let t = empty_tree(4);
        assert_eq!(t.get(0).unwrap(), Field::zero());
        assert_eq!(t.get(200).unwrap(), Field::zero());
    }

    #[test]
    fn update_changes_root_and_is_reflected_in_get() {
        let mut t = empty_tree(4);
        let leaf = Field::from_u64(77);
        t.update(5, leaf).unwrap();
        assert_eq!(t.get(5).unwrap(), leaf);
        assert_ne!(t.root(), SparseMerkleTree::new(4, 4, Field::zero(), hash_node4).root());
    }

    #[test]
    fn untouched_keys_stay_default_after_a_sibling_update() {
        let mut t = empty_tree(4);
        t.update(5, Field::from_u64(1)).unwrap();
        assert_eq!(t.get(6).unwrap(), Field::zero());
        assert_eq!(t.get(4).unwrap(), Field::zero());
    }

    #[test]
    fn proof_reproduces_root_after_update() {
        let mut t = empty_tree(3);
        let leaf = Field::from_u64(999);
        t.update(17, leaf).unwrap();

        let proof = t.create_proof(17).unwrap();
        assert_eq!(proof.len(), 3 * (4 - 1));

        let recomputed = verify_proof(17, leaf, &proof, 3, 4, hash_node4).unwrap();
        assert_eq!(recomputed, t.root());
    }

    #[test]
    fn proof_for_untouched_leaf_reproduces_default_root() {
        let t = empty_tree(3);
        let proof = t.create_proof(9).unwrap();
        let recomputed = verify_proof(9, Field::zero(), &proof, 3, 4, hash_node4).unwrap();
        assert_eq!(recomputed, t.root());
    }

    #[test]
    fn out_of_range_key_is_rejected() {
        let t = empty_tree(2);
        assert!(t.get(16).is_err());
        assert!(t.get(15).is_ok());
    }

    #[test]
    fn sequential_updates_to_same_key_overwrite_not_accumulate() {
        let mut t = empty_tree(3);
        t.update(1, Field::from_u64(10)).unwrap();
        t.update(1, Field::from_u64(20)).unwrap();
        assert_eq!(t.get(1).unwrap(), Field::from_u64(20));
    }
}
