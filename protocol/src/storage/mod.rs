//! # Storage Module
//!
//! Blocks, Merkle commitments and the on-disk pipeline state.
//!
//! ## Architecture
//!
//! ```text
//! merkle.rs - Flat Merkle tree over leaf hashes, proofs
//! block.rs  - Block structure, assembly, content id, verification
//! db.rs     - sled persistence: pending txs, purchases, anchored blocks
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Transaction → pending → in-flight Block → Ledger
//!                  ↓             ↓             ↓
//!             PurchaseDB    PurchaseDB    commit_anchored
//! ```
//!
//! Bincode is the on-disk format. JSON is for APIs and debugging.

pub mod block;
pub mod db;
pub mod merkle;

pub use block::{compute_merkle_root, Block, BlockError, BlockHeader};
pub use db::{ChainTip, DbError, PurchaseDB, PurchaseState, PurchaseStatus};
pub use merkle::{
    build_merkle_tree, merkle_proof, merkle_root, merkle_tree_size, verify_merkle_proof,
    MerkleError, EMPTY_MERKLE_ROOT,
};
