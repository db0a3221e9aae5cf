//! # Network Module
//!
//! Everything between an admitted transaction and an anchored block.
//!
//! ## Architecture
//!
//! ```text
//! pool.rs      - Sequenced transaction pool (strict global order)
//! producer.rs  - Periodic block assembly and anchoring
//! rpc.rs       - JSON-RPC request/response types for the ledger API
//! ```
//!
//! ## Design Decisions
//!
//! - The pool is protected by `parking_lot::Mutex` rather than `tokio::Mutex`:
//!   admission never awaits, and the critical section is a single sled
//!   transaction.
//! - The producer is the only writer of the chain tip. It runs as a single
//!   task and re-arms its timer after each run.
//! - The RPC layer defines types only. HTTP serving happens in the node
//!   binary via axum; the client lives in [`crate::ledger::rpc`].

pub mod pool;
pub mod producer;
pub mod rpc;

pub use pool::{PoolError, TransactionPool};
pub use producer::{BlockProducer, ProducerError, ProductionObserver};
pub use rpc::{LedgerMethod, RpcError, RpcRequest, RpcResponse};
