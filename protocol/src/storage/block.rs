//! # Block Structure
//!
//! A block batches admitted transactions under a header that commits to
//! them through a Merkle root. Only the header is anchored on the ledger;
//! the body stays in local storage, addressed by its [`Block::cid`].
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── height: u64                            │
//! │  ├── prev_hash: Hash                        │
//! │  ├── merkle_root: Hash   (over tx hashes)   │
//! │  └── timestamp: u64      (unix seconds)     │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block hash is `hash_full(header)`. It is derived on demand and never
//! stored inside the header, and a block's canonical encoding is its
//! header's, so `hash_full(block) == hash_full(block.header)` always.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::merkle::merkle_root;
use crate::crypto::codec::{hash_full, CanonicalEncode, CanonicalEncoder};
use crate::crypto::hash::{blake3_hash, Hash};
use crate::transaction::{verify_transaction, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block {height} merkle root mismatch: stored={stored}, computed={computed}")]
    MerkleRootMismatch {
        height: u64,
        stored: Hash,
        computed: Hash,
    },

    #[error("block {height} has a non-null prev_hash at height 1")]
    BadGenesisLink { height: u64 },

    #[error("block {height} transaction {index} has an invalid signature")]
    InvalidTransaction { height: u64, index: usize },

    #[error("cannot serialize block {height}: {reason}")]
    Encoding { height: u64, reason: String },
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Genesis is 0; the first produced block is 1.
    pub height: u64,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    /// Unix seconds.
    pub timestamp: u64,
}

impl BlockHeader {
    /// `curHash` on the ledger.
    pub fn hash(&self) -> Hash {
        hash_full(self)
    }
}

impl CanonicalEncode for BlockHeader {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.u64(self.height)
            .value(&self.prev_hash)
            .value(&self.merkle_root)
            .u64(self.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Header plus ordered transaction list. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl CanonicalEncode for Block {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        self.header.encode(enc);
    }
}

impl Block {
    /// Assemble the block following `prev_height` / `prev_hash`, stamped now.
    ///
    /// The first block uses `Hash::NULL` and height 0 as its predecessor.
    pub fn create(prev_hash: Hash, prev_height: u64, transactions: Vec<Transaction>) -> Self {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        Self::create_at(prev_hash, prev_height, transactions, now)
    }

    /// Deterministic variant of [`Block::create`].
    pub fn create_at(
        prev_hash: Hash,
        prev_height: u64,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Self {
        let merkle_root = compute_merkle_root(&transactions);
        Block {
            header: BlockHeader {
                height: prev_height + 1,
                prev_hash,
                merkle_root,
                timestamp,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Content identifier of the full body: `"b3"` + base58 of
    /// `BLAKE3(bincode(block))`.
    pub fn cid(&self) -> Result<String, BlockError> {
        let bytes = bincode::serialize(self).map_err(|e| BlockError::Encoding {
            height: self.height(),
            reason: e.to_string(),
        })?;
        Ok(format!("b3{}", bs58::encode(blake3_hash(&bytes)).into_string()))
    }

    /// Structural integrity of a block received from storage or a peer.
    ///
    /// Checks that the stored Merkle root matches the transactions, that
    /// height 1 links to the null hash, and that every transaction carries a
    /// valid signature from its sender.
    pub fn verify(&self) -> Result<(), BlockError> {
        let computed = compute_merkle_root(&self.transactions);
        if self.header.merkle_root != computed {
            return Err(BlockError::MerkleRootMismatch {
                height: self.height(),
                stored: self.header.merkle_root,
                computed,
            });
        }

        if self.header.height == 1 && !self.header.prev_hash.is_null() {
            return Err(BlockError::BadGenesisLink {
                height: self.height(),
            });
        }

        for (index, tx) in self.transactions.iter().enumerate() {
            if !verify_transaction(tx, None) {
                return Err(BlockError::InvalidTransaction {
                    height: self.height(),
                    index,
                });
            }
        }

        Ok(())
    }
}

/// Merkle root over `hash_full` of each transaction, in order.
pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
    let leaves: Vec<Hash> = transactions.iter().map(hash_full).collect();
    merkle_root(&leaves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
