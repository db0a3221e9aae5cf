//! # Anchoring Ledger
//!
//! The append-only store that block headers are anchored into. The ledger
//! is reached through the [`Ledger`] trait so the producer does not care
//! whether it talks to the embedded StorePurchase contract or to a remote
//! JSON-RPC endpoint.
//!
//! ```text
//! anchor.rs - AnchoringClient: per-attempt timeout, retry with backoff
//! rpc.rs    - RpcLedger (reqwest client) and the server-side dispatcher
//! ```
//!
//! ## Contract
//!
//! - Height 0 is a synthetic genesis record that exists before any `add`.
//! - `add` succeeds only for `height == last_height + 1`.
//! - `size()` counts genesis, so `get_last_height() == size() - 1`.
//! - Errors form a closed set keyed by the contract's revert codes.

pub mod anchor;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LEDGER_CODE_HEIGHT_SEQUENCE, LEDGER_CODE_NOT_FOUND};
use crate::crypto::hash::Hash;
use crate::storage::block::BlockHeader;

pub use anchor::AnchoringClient;
pub use rpc::RpcLedger;

// ---------------------------------------------------------------------------
// LedgerRecord
// ---------------------------------------------------------------------------

/// One anchored block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub height: u64,
    pub cur_hash: Hash,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    /// Content id of the full block body, empty for genesis.
    pub cid: String,
}

impl LedgerRecord {
    pub fn genesis() -> Self {
        Self {
            height: 0,
            cur_hash: Hash::NULL,
            prev_hash: Hash::NULL,
            merkle_root: Hash::NULL,
            timestamp: 0,
            cid: String::new(),
        }
    }

    pub fn from_header(header: &BlockHeader, cid: impl Into<String>) -> Self {
        Self {
            height: header.height,
            cur_hash: header.hash(),
            prev_hash: header.prev_hash,
            merkle_root: header.merkle_root,
            timestamp: header.timestamp,
            cid: cid.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// `add` with a height other than `last_height + 1`. Never retried.
    #[error("height sequence violation: cannot append height {height}")]
    HeightSequenceViolation { height: u64 },

    #[error("ledger record not found: {key}")]
    NotFound { key: String },

    /// Network or endpoint failure; the call may succeed if repeated.
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    #[error("ledger submission failed after {attempts} attempts: {last_error}")]
    SubmissionFailed { attempts: u32, last_error: String },
}

impl LedgerError {
    /// Revert code carried on the wire, for the two contract-level errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            LedgerError::HeightSequenceViolation { .. } => Some(LEDGER_CODE_HEIGHT_SEQUENCE),
            LedgerError::NotFound { .. } => Some(LEDGER_CODE_NOT_FOUND),
            _ => None,
        }
    }

    /// Map a wire code back. Unknown codes are treated as transport failures.
    pub fn from_code(code: i32, height: u64, message: &str) -> Self {
        match code {
            LEDGER_CODE_HEIGHT_SEQUENCE => LedgerError::HeightSequenceViolation { height },
            LEDGER_CODE_NOT_FOUND => LedgerError::NotFound {
                key: message.to_string(),
            },
            other => LedgerError::Transport(format!("code {other}: {message}")),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        LedgerError::NotFound { key: key.into() }
    }
}

/// Turns `NotFound` into `Ok(None)` for callers that are only probing.
pub trait LedgerResultExt<T> {
    fn optional(self) -> Result<Option<T>, LedgerError>;
}

impl<T> LedgerResultExt<T> for Result<T, LedgerError> {
    fn optional(self) -> Result<Option<T>, LedgerError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(LedgerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger trait
// ---------------------------------------------------------------------------

/// Append-only, height- and hash-indexed header store.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn add(&self, record: LedgerRecord) -> Result<(), LedgerError>;

    async fn get_by_height(&self, height: u64) -> Result<LedgerRecord, LedgerError>;

    /// Genesis matches `Hash::NULL`.
    async fn get_by_hash(&self, hash: Hash) -> Result<LedgerRecord, LedgerError>;

    /// Records `[from, from + count)` clipped to `[0, last_height]`, ascending.
    async fn get_by_from_height(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<LedgerRecord>, LedgerError>;

    async fn size(&self) -> Result<u64, LedgerError>;

    async fn get_last_height(&self) -> Result<u64, LedgerError>;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        let hv = LedgerError::HeightSequenceViolation { height: 4 };
        assert_eq!(hv.code(), Some(3002));
        assert_eq!(LedgerError::from_code(3002, 4, "revert"), hv);

        let nf = LedgerError::not_found("x");
        assert_eq!(nf.code(), Some(3005));
        assert!(matches!(
            LedgerError::from_code(3005, 0, "x"),
            LedgerError::NotFound { .. }
        ));

        assert!(LedgerError::from_code(-32603, 0, "boom").is_transient());
        assert_eq!(LedgerError::Transport("x".into()).code(), None);
    }

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(LedgerError::Transport("timeout".into()).is_transient());
        assert!(!LedgerError::HeightSequenceViolation { height: 1 }.is_transient());
        assert!(!LedgerError::not_found("h").is_transient());
        assert!(!LedgerError::InvalidResponse("bad".into()).is_transient());
    }

    #[test]
    fn optional_swallows_only_not_found() {
        let found: Result<u64, LedgerError> = Ok(3);
        assert_eq!(found.optional().unwrap(), Some(3));

        let missing: Result<u64, LedgerError> = Err(LedgerError::not_found("h"));
        assert_eq!(missing.optional().unwrap(), None);

        let broken: Result<u64, LedgerError> = Err(LedgerError::Transport("down".into()));
        assert!(broken.optional().is_err());
    }

    #[test]
    fn record_from_header() {
        let header = BlockHeader {
            height: 1,
            prev_hash: Hash::NULL,
            merkle_root: Hash::new([1u8; 32]),
            timestamp: 99,
        };
        let record = LedgerRecord::from_header(&header, "b3abc");
        assert_eq!(record.cur_hash, header.hash());
        assert_eq!(record.merkle_root, header.merkle_root);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("curHash").is_some());
        assert!(json.get("merkleRoot").is_some());
    }
}
