//! JSON-RPC transport for the ledger.
//!
//! [`RpcLedger`] is the client: it POSTs [`RpcRequest`]s to a single URL and
//! maps revert codes `3002` / `3005` back to typed [`LedgerError`]s. Every
//! other failure (connection refused, non-2xx status, unknown error code) is
//! reported as [`LedgerError::Transport`] so the anchoring client retries it.
//!
//! [`dispatch`] is the matching server half. The node mounts it on
//! `POST /ledger` in front of the embedded contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{Ledger, LedgerError, LedgerRecord};
use crate::crypto::hash::Hash;
use crate::network::rpc::{
    CountResponse, HashParams, HeightParams, LedgerMethod, RangeParams, RpcError, RpcRequest,
    RpcResponse,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RpcLedger {
    url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedger {
    /// Per-request deadlines are enforced by [`super::AnchoringClient`]; this
    /// client only bounds connection setup.
    pub fn new(url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            http_client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One round trip. `height` lets a 3002 revert carry the rejected height.
    async fn call<T: DeserializeOwned>(
        &self,
        method: LedgerMethod,
        params: serde_json::Value,
        height: u64,
    ) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(serde_json::json!(id), method, params);

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Transport(format!("request timed out: {e}"))
                } else if e.is_connect() {
                    LedgerError::Transport(format!("connection failed: {e}"))
                } else {
                    LedgerError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("malformed JSON-RPC body: {e}")))?;

        if let Some(err) = body.error {
            debug!(?method, code = err.code, message = %err.message, "ledger rpc error");
            return Err(LedgerError::from_code(err.code, height, &err.message));
        }

        let result = body.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result)
            .map_err(|e| LedgerError::InvalidResponse(format!("unexpected result shape: {e}")))
    }
}

fn params<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, LedgerError> {
    serde_json::to_value(value).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn add(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        let height = record.height;
        let _: serde_json::Value = self.call(LedgerMethod::Add, params(&record)?, height).await?;
        Ok(())
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerRecord, LedgerError> {
        self.call(
            LedgerMethod::GetByHeight,
            params(&HeightParams { height })?,
            height,
        )
        .await
    }

    async fn get_by_hash(&self, hash: Hash) -> Result<LedgerRecord, LedgerError> {
        self.call(LedgerMethod::GetByHash, params(&HashParams { hash })?, 0)
            .await
    }

    async fn get_by_from_height(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.call(
            LedgerMethod::GetByFromHeight,
            params(&RangeParams { from, count })?,
            from,
        )
        .await
    }

    async fn size(&self) -> Result<u64, LedgerError> {
        let r: CountResponse = self.call(LedgerMethod::Size, serde_json::Value::Null, 0).await?;
        Ok(r.value)
    }

    async fn get_last_height(&self) -> Result<u64, LedgerError> {
        let r: CountResponse = self
            .call(LedgerMethod::GetLastHeight, serde_json::Value::Null, 0)
            .await?;
        Ok(r.value)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

impl From<LedgerError> for RpcError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::HeightSequenceViolation { height } => {
                RpcError::height_sequence_violation(height)
            }
            LedgerError::NotFound { key } => RpcError::not_found(key),
            other => RpcError::internal_error(other.to_string()),
        }
    }
}

fn parse_params<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(e.to_string()))
}

async fn handle(ledger: &dyn Ledger, req: RpcRequest) -> Result<serde_json::Value, RpcError> {
    match req.method {
        LedgerMethod::Add => {
            let record: LedgerRecord = parse_params(req.params)?;
            ledger.add(record).await?;
            Ok(serde_json::Value::Null)
        }
        LedgerMethod::GetByHeight => {
            let p: HeightParams = parse_params(req.params)?;
            to_result(ledger.get_by_height(p.height).await?)
        }
        LedgerMethod::GetByHash => {
            let p: HashParams = parse_params(req.params)?;
            to_result(ledger.get_by_hash(p.hash).await?)
        }
        LedgerMethod::GetByFromHeight => {
            let p: RangeParams = parse_params(req.params)?;
            to_result(ledger.get_by_from_height(p.from, p.count).await?)
        }
        LedgerMethod::Size => to_result(CountResponse {
            value: ledger.size().await?,
        }),
        LedgerMethod::GetLastHeight => to_result(CountResponse {
            value: ledger.get_last_height().await?,
        }),
    }
}

/// Serve one JSON-RPC request against `ledger`.
pub async fn dispatch(ledger: &dyn Ledger, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    if req.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request("jsonrpc must be \"2.0\""));
    }
    match handle(ledger, req).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(error) => RpcResponse::error(id, error),
    }
}

/// Like [`dispatch`], for a raw JSON body that may not be a valid request.
pub async fn dispatch_value(ledger: &dyn Ledger, body: serde_json::Value) -> RpcResponse {
    let id = body.get("id").cloned().unwrap_or(serde_json::Value::Null);
    match serde_json::from_value::<RpcRequest>(body) {
        Ok(req) => dispatch(ledger, req).await,
        Err(e) => RpcResponse::error(id, RpcError::invalid_request(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::FlakyLedger;

    fn record(height: u64) -> LedgerRecord {
        LedgerRecord {
            height,
            cur_hash: Hash::new([height as u8; 32]),
            prev_hash: Hash::NULL,
            merkle_root: Hash::NULL,
            timestamp: 1,
            cid: "b3x".into(),
        }
    }

    fn req(method: LedgerMethod, params: serde_json::Value) -> RpcRequest {
        RpcRequest::new(serde_json::json!(7), method, params)
    }

    #[tokio::test]
    async fn dispatch_add_and_get() {
        let ledger = FlakyLedger::new();
        let resp = dispatch(
            &ledger,
            req(LedgerMethod::Add, serde_json::to_value(record(1)).unwrap()),
        )
        .await;
        assert!(resp.error.is_none());
        assert_eq!(resp.id, serde_json::json!(7));

        let resp = dispatch(
            &ledger,
            req(LedgerMethod::GetByHeight, serde_json::json!({ "height": 1 })),
        )
        .await;
        let got: LedgerRecord = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(got, record(1));

        let resp = dispatch(&ledger, req(LedgerMethod::Size, serde_json::Value::Null)).await;
        assert_eq!(resp.result.unwrap(), serde_json::json!({ "value": 2 }));
    }

    #[tokio::test]
    async fn dispatch_maps_revert_codes() {
        let ledger = FlakyLedger::new();
        let resp = dispatch(
            &ledger,
            req(LedgerMethod::Add, serde_json::to_value(record(5)).unwrap()),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, 3002);

        let resp = dispatch(
            &ledger,
            req(LedgerMethod::GetByHeight, serde_json::json!({ "height": 9 })),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, 3005);
    }

    #[tokio::test]
    async fn dispatch_rejects_bad_input() {
        let ledger = FlakyLedger::new();
        let resp = dispatch(
            &ledger,
            req(LedgerMethod::GetByHeight, serde_json::json!({ "height": "x" })),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, -32602);

        let resp = dispatch_value(
            &ledger,
            serde_json::json!({ "jsonrpc": "2.0", "id": 3, "method": "ledger_burn" }),
        )
        .await;
        assert_eq!(resp.id, serde_json::json!(3));
        assert_eq!(resp.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let client = RpcLedger::new("http://127.0.0.1:1/ledger");
        let err = client.size().await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }
}
