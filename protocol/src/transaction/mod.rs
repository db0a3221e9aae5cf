//! # Transaction Module
//!
//! The purchase transaction model: construction, canonical hashing,
//! signing and verification.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        - Value types (Amount, PurchaseDetails) and boundary parsing
//! builder.rs      - NewTransaction / CancelTransaction, the Transaction union, builders
//! signing.rs      - Two-step signing with Ed25519 keypairs
//! verification.rs - Signature recovery and structural checks
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build** - [`NewTransactionBuilder`] or [`CancelTransactionBuilder`].
//! 2. **Sign** - [`sign_transaction`] with the manager keypair.
//! 3. **Admit** - the pool checks the sequence and persists it.
//! 4. **Block** - the producer consumes it into exactly one block.
//!
//! ## Design Decisions
//!
//! - Every transaction carries a schema `version`, encoded first after the
//!   kind byte. Unknown versions are rejected when parsing.
//! - Amounts are arbitrary-precision integers in 18-decimal fixed point. No
//!   floating point anywhere near monetary values.
//! - `sender` is part of the hash, so a signature is only valid for the
//!   address that produced it.

pub mod builder;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{
    CancelTransaction, CancelTransactionBuilder, NewTransaction, NewTransactionBuilder,
    Transaction,
};
pub use signing::{apply_signature, compute_signing_hash, sign_transaction};
pub use types::{parse_u64, Amount, ParseError, PurchaseDetails};
pub use verification::verify_transaction;
