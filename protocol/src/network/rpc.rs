//! # JSON-RPC API Definitions
//!
//! Wire types for the ledger JSON-RPC 2.0 API. The client lives in
//! [`crate::ledger::rpc`]; the server is the node's `POST /ledger` route,
//! which hands requests to [`crate::ledger::rpc::dispatch`].
//!
//! Method names are prefixed with `ledger_` so the endpoint can share a
//! port with other JSON-RPC services.
//!
//! ## Method Index
//!
//! | Method                    | Params              | Result                |
//! |---------------------------|---------------------|-----------------------|
//! | `ledger_add`              | `LedgerRecord`      | `null`                |
//! | `ledger_getByHeight`      | `{height}`          | `LedgerRecord`        |
//! | `ledger_getByHash`        | `{hash}`            | `LedgerRecord`        |
//! | `ledger_getByFromHeight`  | `{from, count}`     | `[LedgerRecord]`      |
//! | `ledger_size`             | none                | `{value}`             |
//! | `ledger_getLastHeight`    | none                | `{value}`             |

use serde::{Deserialize, Serialize};

use crate::config::{LEDGER_CODE_HEIGHT_SEQUENCE, LEDGER_CODE_NOT_FOUND};
use crate::crypto::hash::Hash;

// ---------------------------------------------------------------------------
// RPC Method Enumeration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerMethod {
    #[serde(rename = "ledger_add")]
    Add,
    #[serde(rename = "ledger_getByHeight")]
    GetByHeight,
    #[serde(rename = "ledger_getByHash")]
    GetByHash,
    #[serde(rename = "ledger_getByFromHeight")]
    GetByFromHeight,
    #[serde(rename = "ledger_size")]
    Size,
    #[serde(rename = "ledger_getLastHeight")]
    GetLastHeight,
}

// ---------------------------------------------------------------------------
// RPC Request / Response
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request. `params` is parsed by the method handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: LedgerMethod,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: serde_json::Value, method: LedgerMethod, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// RPC Errors
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 error object.
///
/// Standard codes `-32700..=-32600` for protocol failures; the ledger's own
/// revert codes (`3002`, `3005`) for contract-level rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(-32700, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("method not found: {}", method.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    /// The record's height is not `last_height + 1`.
    pub fn height_sequence_violation(height: u64) -> Self {
        Self::new(
            LEDGER_CODE_HEIGHT_SEQUENCE,
            format!("height sequence violation at height {height}"),
        )
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(
            LEDGER_CODE_NOT_FOUND,
            format!("not found: {}", key.into()),
        )
    }
}

// ---------------------------------------------------------------------------
// Typed Params / Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightParams {
    pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashParams {
    pub hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeParams {
    pub from: u64,
    pub count: u64,
}

/// Result of `ledger_size` and `ledger_getLastHeight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub value: u64,
}
