// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Purchase Protocol - Core Library
//!
//! Point-of-sale purchases and cancellations, sequenced, batched into
//! Merkle-committed blocks and anchored to an append-only ledger.
//!
//! ## Architecture
//!
//! - **crypto** - Canonical encoding, BLAKE3 hashing, Ed25519 signing.
//! - **transaction** - Purchase and cancel transactions, amounts, signing.
//! - **storage** - Merkle trees, blocks, and the sled-backed pipeline state.
//! - **network** - Sequenced pool, block producer, ledger RPC types.
//! - **ledger** - The `Ledger` trait, retrying anchoring client, RPC client.
//! - **config** - Protocol constants and tunables.
//!
//! ## Ground Rules
//!
//! 1. Anything hashed goes through [`crypto::codec`]; serde formats are
//!    never hash input.
//! 2. The pool owns the last accepted sequence. Nobody else writes it.
//! 3. A block leaves the node only after it is durably in flight.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod transaction;
