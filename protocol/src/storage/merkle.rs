//! # Merkle Tree
//!
//! Binary Merkle tree over transaction hashes, stored flattened level by
//! level: the leaves first, then each parent level, the root last.
//!
//! ```text
//!   leaves:  h0  h1  h2  h3  h4  h5  h6
//!   level 1: H(h0,h1) H(h2,h3) H(h4,h5) H(h6,h6)
//!   level 2: ...
//!   root
//! ```
//!
//! An odd level pairs its last node with itself. The duplicate is hashed but
//! not stored, so seven leaves flatten to `7 + 4 + 2 + 1 = 14` entries.
//! Parents are `BLAKE3(left || right)` over the raw 32-byte values.

use thiserror::Error;

use crate::crypto::hash::{blake3_hash_multi, Hash};

/// Root recorded for a block with no transactions.
pub const EMPTY_MERKLE_ROOT: Hash = Hash::NULL;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("cannot build a merkle tree from zero leaves")]
    EmptyLeaves,

    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },

    #[error("tree has {actual} entries, expected {expected} for {leaf_count} leaves")]
    MalformedTree {
        leaf_count: usize,
        expected: usize,
        actual: usize,
    },
}

fn parent(left: &Hash, right: &Hash) -> Hash {
    Hash::new(blake3_hash_multi(&[&left.as_bytes()[..], &right.as_bytes()[..]]))
}

/// Build the flattened tree. A single leaf yields `[leaf]`.
pub fn build_merkle_tree(leaves: &[Hash]) -> Result<Vec<Hash>, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeaves);
    }

    let mut tree = Vec::with_capacity(merkle_tree_size(leaves.len()));
    tree.extend_from_slice(leaves);

    let mut level_start = 0;
    let mut level_len = leaves.len();
    while level_len > 1 {
        for i in (0..level_len).step_by(2) {
            let right = (i + 1).min(level_len - 1);
            let node = parent(&tree[level_start + i], &tree[level_start + right]);
            tree.push(node);
        }
        level_start += level_len;
        level_len = (level_len + 1) / 2;
    }

    Ok(tree)
}

/// Root over `leaves`, or [`EMPTY_MERKLE_ROOT`] when there are none.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match build_merkle_tree(leaves) {
        Ok(tree) => tree.last().copied().unwrap_or(EMPTY_MERKLE_ROOT),
        Err(_) => EMPTY_MERKLE_ROOT,
    }
}

/// Length of the flattened tree for `leaf_count` leaves.
pub fn merkle_tree_size(leaf_count: usize) -> usize {
    if leaf_count == 0 {
        return 0;
    }
    let mut total = 0;
    let mut level = leaf_count;
    loop {
        total += level;
        if level == 1 {
            return total;
        }
        level = (level + 1) / 2;
    }
}

/// Sibling path from leaf `index` up to (excluding) the root.
pub fn merkle_proof(
    tree: &[Hash],
    leaf_count: usize,
    index: usize,
) -> Result<Vec<Hash>, MerkleError> {
    if leaf_count == 0 {
        return Err(MerkleError::EmptyLeaves);
    }
    if index >= leaf_count {
        return Err(MerkleError::IndexOutOfRange { index, leaf_count });
    }
    let expected = merkle_tree_size(leaf_count);
    if tree.len() != expected {
        return Err(MerkleError::MalformedTree {
            leaf_count,
            expected,
            actual: tree.len(),
        });
    }

    let mut path = Vec::new();
    let mut level_start = 0;
    let mut level_len = leaf_count;
    let mut pos = index;
    while level_len > 1 {
        let sibling = if pos % 2 == 0 {
            (pos + 1).min(level_len - 1)
        } else {
            pos - 1
        };
        path.push(tree[level_start + sibling]);
        level_start += level_len;
        level_len = (level_len + 1) / 2;
        pos /= 2;
    }
    Ok(path)
}

/// Check that `leaf` at `index` hashes up to `root` along `path`.
pub fn verify_merkle_proof(leaf: &Hash, index: usize, path: &[Hash], root: &Hash) -> bool {
    let mut acc = *leaf;
    let mut pos = index;
    for sibling in path {
        acc = if pos % 2 == 0 {
            parent(&acc, sibling)
        } else {
            parent(sibling, &acc)
        };
        pos /= 2;
    }
    &acc == root
}
