//! # REST API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                       | Description                          |
//! |--------|----------------------------|--------------------------------------|
//! | GET    | `/`                        | Liveness probe                       |
//! | GET    | `/v1/status`               | Node status summary                  |
//! | GET    | `/v1/tx/sequence`          | Last accepted sequence (−1 if none)  |
//! | POST   | `/v1/tx/purchase/new`      | Record a purchase                    |
//! | POST   | `/v1/tx/purchase/cancel`   | Record a cancellation                |
//! | GET    | `/v1/purchase/verify`      | Purchase lookup by `purchaseId`      |
//! | POST   | `/ledger`                  | JSON-RPC 2.0 for the embedded ledger |
//!
//! ## Response Envelope
//!
//! Every `/v1` endpoint answers HTTP 200 with `{code, data, error}`. The
//! `code` is machine-checkable: `0` success, `400` invalid parameter, `401`
//! bad access key, `404` unknown purchase, `417` unexpected sequence, `500`
//! internal failure.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use purchase_protocol::config::{AMOUNT_DECIMALS, PERCENT_DECIMALS};
use purchase_protocol::crypto::hash::{phone_hash, Hash};
use purchase_protocol::crypto::keys::{Address, Keypair};
use purchase_protocol::ledger::{rpc::dispatch_value, Ledger};
use purchase_protocol::network::pool::{PoolError, TransactionPool};
use purchase_protocol::network::rpc::RpcResponse;
use purchase_protocol::transaction::{
    parse_u64, sign_transaction, Amount, CancelTransactionBuilder, NewTransactionBuilder,
    PurchaseDetails, Transaction,
};

use crate::metrics::NodeMetrics;

pub const CODE_OK: u16 = 0;
pub const CODE_INVALID_PARAM: u16 = 400;
pub const CODE_UNAUTHORIZED: u16 = 401;
pub const CODE_NOT_FOUND: u16 = 404;
pub const CODE_SEQUENCE: u16 = 417;
pub const CODE_INTERNAL: u16 = 500;

const MSG_AUTH: &str = "Authentication Error";
const MSG_INTERNAL: &str = "Failed to transaction record.";
const MSG_SEQUENCE: &str = "sequence is different from the expected value";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Shared secret every write request must carry.
    pub access_key: Arc<str>,
    /// Sequenced admission into the pending set.
    pub pool: Arc<TransactionPool>,
    /// Signs every transaction the node records.
    pub manager: Arc<Keypair>,
    pub metrics: Arc<NodeMetrics>,
    /// Served on `POST /ledger` when the node hosts the ledger itself.
    pub ledger: Option<Arc<dyn Ledger>>,
}

// ---------------------------------------------------------------------------
// Response Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseData {
    pub fn ok(data: Value) -> Json<Self> {
        Json(Self {
            code: CODE_OK,
            data: Some(data),
            error: None,
        })
    }

    pub fn fail(code: u16, error: Value) -> Json<Self> {
        Json(Self {
            code,
            data: None,
            error: Some(error),
        })
    }

    fn internal() -> Json<Self> {
        Self::fail(CODE_INTERNAL, json!({ "msg": MSG_INTERNAL }))
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/", get(health_handler))
        .route("/v1/status", get(status_handler))
        .route("/v1/tx/sequence", get(sequence_handler))
        .route("/v1/tx/purchase/new", post(new_purchase_handler))
        .route("/v1/tx/purchase/cancel", post(cancel_purchase_handler))
        .route("/v1/purchase/verify", get(verify_handler))
        .with_state(state.clone());

    if let Some(ledger) = state.ledger {
        router = router.merge(
            Router::new()
                .route("/ledger", post(ledger_rpc_handler))
                .with_state(ledger),
        );
    }

    router.layer(cors).layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Parameter Validation
// ---------------------------------------------------------------------------

/// First failed check of a request body, in express-validator's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldError {
    param: &'static str,
    msg: String,
}

impl FieldError {
    fn invalid(param: &'static str) -> Self {
        Self {
            param,
            msg: "Invalid value".to_string(),
        }
    }

    fn with_msg(param: &'static str, msg: impl Into<String>) -> Self {
        Self {
            param,
            msg: msg.into(),
        }
    }

    fn into_response(self) -> Json<ResponseData> {
        ResponseData::fail(
            CODE_INVALID_PARAM,
            json!({ "param": self.param, "msg": self.msg, "location": "body" }),
        )
    }
}

/// Field access over a JSON request body.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    fn get(&self, name: &'static str) -> Result<&'a Value, FieldError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Err(FieldError::invalid(name)),
            Some(v) => Ok(v),
        }
    }

    /// Field rendered as trimmed text; numbers keep their JSON spelling.
    fn text(&self, name: &'static str) -> Result<String, FieldError> {
        Ok(value_text(self.get(name)?))
    }

    fn non_empty(&self, name: &'static str) -> Result<String, FieldError> {
        let text = self.text(name)?;
        if text.is_empty() {
            return Err(FieldError::invalid(name));
        }
        Ok(text)
    }

    fn u64(&self, name: &'static str) -> Result<u64, FieldError> {
        parse_u64(&self.text(name)?).map_err(|e| FieldError::with_msg(name, e.to_string()))
    }

    fn amount(&self, name: &'static str) -> Result<Amount, FieldError> {
        Amount::from_decimal(&self.text(name)?, AMOUNT_DECIMALS)
            .map_err(|e| FieldError::with_msg(name, e.to_string()))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Unwraps the JSON body; anything but an object fails on `accessKey`.
fn body_object(payload: &Result<Json<Value>, JsonRejection>) -> Result<&Map<String, Value>, FieldError> {
    match payload {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(_) => Err(FieldError::with_msg("accessKey", MSG_AUTH)),
        Err(rejection) => Err(FieldError::with_msg("body", rejection.body_text())),
    }
}

/// `accessKey` must be present; it is compared only after every other field
/// validated, so a wrong key on a malformed request still reports the field.
fn access_key(fields: &Fields<'_>) -> Result<String, FieldError> {
    fields
        .text("accessKey")
        .map_err(|_| FieldError::with_msg("accessKey", MSG_AUTH))
}

fn shop_id(fields: &Fields<'_>) -> Result<Hash, FieldError> {
    fields
        .text("shopId")?
        .parse()
        .map_err(|_| FieldError::invalid("shopId"))
}

fn user_account(fields: &Fields<'_>) -> Result<Option<Address>, FieldError> {
    let text = fields.text("userAccount")?;
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| FieldError::invalid("userAccount"))
}

/// Line items missing `productId`, `amount` or `providePercent` are skipped.
/// `providePercent` is a percentage; fractions below 0.01 are dropped.
fn details(fields: &Fields<'_>) -> Result<Vec<PurchaseDetails>, FieldError> {
    let items = match fields.get("details")? {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(FieldError::invalid("details")),
    };

    let mut details = Vec::with_capacity(items.len());
    for item in items {
        let (Some(product_id), Some(amount), Some(percent)) = (
            item.get("productId"),
            item.get("amount"),
            item.get("providePercent"),
        ) else {
            continue;
        };
        let amount = Amount::from_decimal(&value_text(amount), AMOUNT_DECIMALS)
            .map_err(|e| FieldError::with_msg("details", e.to_string()))?;
        let percent = Amount::from_decimal_truncated(&value_text(percent), PERCENT_DECIMALS)
            .and_then(|p| p.to_u32())
            .map_err(|e| FieldError::with_msg("details", e.to_string()))?;
        details.push(PurchaseDetails::new(value_text(product_id), amount, percent));
    }
    Ok(details)
}

struct NewPurchase {
    access_key: String,
    builder: NewTransactionBuilder,
}

fn parse_new_purchase(fields: &Fields<'_>) -> Result<NewPurchase, FieldError> {
    let access_key = access_key(fields)?;
    let sequence = fields.u64("sequence")?;
    let purchase_id = fields.non_empty("purchaseId")?;
    let timestamp = fields.u64("timestamp")?;
    let total = fields.amount("totalAmount")?;
    let cash = fields.amount("cashAmount")?;
    let currency = fields.non_empty("currency")?;
    let shop_id = shop_id(fields)?;
    let account = user_account(fields)?;
    let phone = fields.text("userPhone")?;
    let details = details(fields)?;

    let mut builder = NewTransactionBuilder::new(sequence, purchase_id)
        .timestamp(timestamp)
        .amounts(total, cash)
        .currency(currency)
        .shop_id(shop_id)
        .phone_hash(phone_hash(&phone))
        .details(details);
    if let Some(account) = account {
        builder = builder.user_account(account);
    }
    Ok(NewPurchase {
        access_key,
        builder,
    })
}

struct CancelPurchase {
    access_key: String,
    builder: CancelTransactionBuilder,
}

fn parse_cancel_purchase(fields: &Fields<'_>) -> Result<CancelPurchase, FieldError> {
    let access_key = access_key(fields)?;
    let sequence = fields.u64("sequence")?;
    let purchase_id = fields.non_empty("purchaseId")?;
    let timestamp = fields.u64("timestamp")?;
    Ok(CancelPurchase {
        access_key,
        builder: CancelTransactionBuilder::new(sequence, purchase_id).timestamp(timestamp),
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /` returns `"OK"` while the process is serving.
async fn health_handler() -> impl IntoResponse {
    Json("OK")
}

/// `GET /v1/status` summarizes sequencing and anchoring progress.
async fn status_handler(State(state): State<AppState>) -> Json<ResponseData> {
    let last = match state.pool.last_sequence() {
        Ok(last) => last,
        Err(e) => {
            tracing::error!(error = %e, "GET /v1/status");
            return ResponseData::internal();
        }
    };
    let tip = match state.pool.db().get_chain_tip() {
        Ok(tip) => tip,
        Err(e) => {
            tracing::error!(error = %e, "GET /v1/status");
            return ResponseData::internal();
        }
    };

    ResponseData::ok(json!({
        "version": state.version,
        "manager": state.manager.address().to_string(),
        "lastSequence": sequence_value(last),
        "pendingTransactions": state.pool.pending_count(),
        "height": tip.height,
        "blockHash": tip.hash,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /v1/tx/sequence` returns the last accepted sequence.
async fn sequence_handler(State(state): State<AppState>) -> Json<ResponseData> {
    tracing::debug!("GET /v1/tx/sequence");
    match state.pool.last_sequence() {
        Ok(last) => ResponseData::ok(json!({ "sequence": sequence_value(last) })),
        Err(e) => {
            tracing::error!(error = %e, "GET /v1/tx/sequence");
            ResponseData::internal()
        }
    }
}

fn sequence_value(last: Option<u64>) -> i64 {
    last.map_or(-1, |s| i64::try_from(s).unwrap_or(i64::MAX))
}

/// `POST /v1/tx/purchase/new` validates, signs and admits a purchase.
async fn new_purchase_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Json<ResponseData> {
    tracing::debug!("POST /v1/tx/purchase/new");
    let parsed = body_object(&payload).and_then(|body| parse_new_purchase(&Fields(body)));
    let purchase = match parsed {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    if purchase.access_key != *state.access_key {
        return ResponseData::fail(CODE_UNAUTHORIZED, json!({ "msg": MSG_AUTH }));
    }
    let tx = purchase.builder.sender(state.manager.address()).build();
    record(&state, tx).await
}

/// `POST /v1/tx/purchase/cancel` validates, signs and admits a cancellation.
async fn cancel_purchase_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Json<ResponseData> {
    tracing::debug!("POST /v1/tx/purchase/cancel");
    let parsed = body_object(&payload).and_then(|body| parse_cancel_purchase(&Fields(body)));
    let cancel = match parsed {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if cancel.access_key != *state.access_key {
        return ResponseData::fail(CODE_UNAUTHORIZED, json!({ "msg": MSG_AUTH }));
    }
    let tx = cancel.builder.sender(state.manager.address()).build();
    record(&state, tx).await
}

/// Signs `tx` with the manager key and hands it to the pool.
///
/// Admission takes the sequencer lock and fsyncs, so it runs on the
/// blocking pool.
async fn record(state: &AppState, tx: Transaction) -> Json<ResponseData> {
    let pool = state.pool.clone();
    let manager = state.manager.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let signed = sign_transaction(&tx, &manager);
        let admitted = pool.admit(&signed);
        (signed, admitted)
    })
    .await;
    let (signed, admitted) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "admission task failed");
            return ResponseData::internal();
        }
    };

    match admitted {
        Ok(_) => {
            state.metrics.transactions_admitted_total.inc();
            match transaction_json(&signed) {
                Ok(data) => ResponseData::ok(data),
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode admitted transaction");
                    ResponseData::internal()
                }
            }
        }
        Err(PoolError::SequenceMismatch { expected, actual }) => {
            state.metrics.sequence_rejections_total.inc();
            ResponseData::fail(
                CODE_SEQUENCE,
                json!({
                    "param": "sequence",
                    "expected": expected,
                    "actual": actual,
                    "msg": MSG_SEQUENCE,
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, sequence = signed.sequence(), "failed to record transaction");
            ResponseData::internal()
        }
    }
}

/// The flat JSON form of either transaction kind.
fn transaction_json(tx: &Transaction) -> serde_json::Result<Value> {
    match tx {
        Transaction::New(new) => serde_json::to_value(new),
        Transaction::Cancel(cancel) => serde_json::to_value(cancel),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyQuery {
    purchase_id: Option<String>,
}

/// `GET /v1/purchase/verify?purchaseId=` looks a purchase up in local storage.
async fn verify_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Json<ResponseData> {
    let purchase_id = match query.purchase_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return FieldError::invalid("purchaseId").into_response(),
    };

    match state.pool.db().get_purchase(&purchase_id) {
        Ok(Some(status)) => match serde_json::to_value(&status) {
            Ok(data) => ResponseData::ok(data),
            Err(e) => {
                tracing::error!(error = %e, purchase_id, "failed to encode purchase");
                ResponseData::internal()
            }
        },
        Ok(None) => ResponseData::fail(
            CODE_NOT_FOUND,
            json!({ "param": "purchaseId", "msg": "purchase not found" }),
        ),
        Err(e) => {
            tracing::error!(error = %e, purchase_id, "GET /v1/purchase/verify");
            ResponseData::internal()
        }
    }
}

/// `POST /ledger` answers ledger JSON-RPC calls against the embedded contract.
async fn ledger_rpc_handler(
    State(ledger): State<Arc<dyn Ledger>>,
    Json(body): Json<Value>,
) -> Json<RpcResponse> {
    Json(dispatch_value(ledger.as_ref(), body).await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
