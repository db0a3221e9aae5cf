//! # Purchase Ledger Contracts
//!
//! The ledger side of anchoring. Block headers produced by the node are
//! appended here and can be read back by height, hash or range.
//!
//! - **StorePurchase** - the append-only header registry with its two
//!   revert conditions (height-sequence violation, not found).
//! - **ContractLedger** - a lock-protected, event-emitting host for the
//!   registry that implements the protocol's `Ledger` trait, so it can be
//!   used in-process or served over JSON-RPC.
//!
//! ## Design Principles
//!
//! 1. Rejections never mutate state.
//! 2. Height 0 always exists; `size()` is never zero.
//! 3. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod store_purchase;

pub use store_purchase::{AddedBlock, ContractLedger, JournalError, StorePurchase};
