//! Transaction construction via the builder pattern.
//!
//! [`NewTransactionBuilder`] and [`CancelTransactionBuilder`] collect the
//! business fields, call `.build()`, and hand back an unsigned
//! [`Transaction`]. Signing is a separate step in [`super::signing`], so
//! construction stays testable without key material.
//!
//! # Canonical Byte Format
//!
//! `hash_full` of a transaction is BLAKE3 over its [`CanonicalEncode`]
//! output. A kind byte comes first (`0x01` new, `0x02` cancel), then the
//! schema version, then every field in declaration order. The `signature`
//! field is never encoded, so the hash is stable across signing.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{empty_as_none, schema_version, Amount, PurchaseDetails};
use crate::config::SCHEMA_VERSION;
use crate::crypto::codec::{CanonicalEncode, CanonicalEncoder};
use crate::crypto::hash::Hash;
use crate::crypto::keys::Address;
use crate::crypto::signatures::Signature;

const KIND_NEW: u8 = 0x01;
const KIND_CANCEL: u8 = 0x02;

// ---------------------------------------------------------------------------
// NewTransaction
// ---------------------------------------------------------------------------

/// A purchase being recorded.
///
/// The user is identified either by `user_account` or by `phone_hash`; the
/// unused channel is empty (`None` / [`Hash::NULL`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[serde(with = "schema_version")]
    pub version: u16,
    pub sequence: u64,
    pub purchase_id: String,
    /// Unix seconds.
    pub timestamp: u64,
    pub total_amount: Amount,
    pub cash_amount: Amount,
    pub currency: String,
    pub shop_id: Hash,
    #[serde(with = "empty_as_none")]
    pub user_account: Option<Address>,
    pub phone_hash: Hash,
    pub details: Vec<PurchaseDetails>,
    pub sender: Address,
    #[serde(with = "empty_as_none")]
    pub signature: Option<Signature>,
}

impl CanonicalEncode for NewTransaction {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.u8(KIND_NEW)
            .u16(self.version)
            .u64(self.sequence)
            .str(&self.purchase_id)
            .u64(self.timestamp)
            .value(&self.total_amount)
            .value(&self.cash_amount)
            .str(&self.currency)
            .value(&self.shop_id)
            .option(self.user_account.as_ref())
            .value(&self.phone_hash)
            .list(&self.details)
            .value(&self.sender);
    }
}

// ---------------------------------------------------------------------------
// CancelTransaction
// ---------------------------------------------------------------------------

/// Cancellation of an earlier purchase, referenced by `purchase_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTransaction {
    #[serde(with = "schema_version")]
    pub version: u16,
    pub sequence: u64,
    pub purchase_id: String,
    pub timestamp: u64,
    pub sender: Address,
    #[serde(with = "empty_as_none")]
    pub signature: Option<Signature>,
}

impl CanonicalEncode for CancelTransaction {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        enc.u8(KIND_CANCEL)
            .u16(self.version)
            .u64(self.sequence)
            .str(&self.purchase_id)
            .u64(self.timestamp)
            .value(&self.sender);
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Either kind of purchase transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transaction {
    New(NewTransaction),
    Cancel(CancelTransaction),
}

impl Transaction {
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::New(_) => "new",
            Transaction::Cancel(_) => "cancel",
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Transaction::New(tx) => tx.sequence,
            Transaction::Cancel(tx) => tx.sequence,
        }
    }

    pub fn purchase_id(&self) -> &str {
        match self {
            Transaction::New(tx) => &tx.purchase_id,
            Transaction::Cancel(tx) => &tx.purchase_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Transaction::New(tx) => tx.timestamp,
            Transaction::Cancel(tx) => tx.timestamp,
        }
    }

    pub fn sender(&self) -> &Address {
        match self {
            Transaction::New(tx) => &tx.sender,
            Transaction::Cancel(tx) => &tx.sender,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Transaction::New(tx) => tx.signature.as_ref(),
            Transaction::Cancel(tx) => tx.signature.as_ref(),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature().is_some()
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Transaction::Cancel(_))
    }

    pub(crate) fn with_signer(mut self, signature: Option<Signature>, sender: Address) -> Self {
        match &mut self {
            Transaction::New(tx) => {
                tx.signature = signature;
                tx.sender = sender;
            }
            Transaction::Cancel(tx) => {
                tx.signature = signature;
                tx.sender = sender;
            }
        }
        self
    }
}

impl CanonicalEncode for Transaction {
    fn encode(&self, enc: &mut CanonicalEncoder) {
        match self {
            Transaction::New(tx) => tx.encode(enc),
            Transaction::Cancel(tx) => tx.encode(enc),
        }
    }
}

impl From<NewTransaction> for Transaction {
    fn from(tx: NewTransaction) -> Self {
        Transaction::New(tx)
    }
}

impl From<CancelTransaction> for Transaction {
    fn from(tx: CancelTransaction) -> Self {
        Transaction::Cancel(tx)
    }
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// NewTransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned purchase transactions.
///
/// ```
/// use purchase_protocol::transaction::{NewTransactionBuilder, Amount, PurchaseDetails};
///
/// let tx = NewTransactionBuilder::new(0, "P0001")
///     .amounts(Amount::from(100u64), Amount::from(100u64))
///     .currency("krw")
///     .detail(PurchaseDetails::new("PID001", Amount::from(100u64), 300))
///     .timestamp(1_668_044_556)
///     .build();
/// assert!(!tx.is_signed());
/// ```
///
/// `version` defaults to the current schema version and `timestamp` to the
/// current UTC second.
pub struct NewTransactionBuilder {
    version: u16,
    sequence: u64,
    purchase_id: String,
    timestamp: Option<u64>,
    total_amount: Amount,
    cash_amount: Amount,
    currency: String,
    shop_id: Hash,
    user_account: Option<Address>,
    phone_hash: Hash,
    details: Vec<PurchaseDetails>,
    sender: Address,
}

impl NewTransactionBuilder {
    pub fn new(sequence: u64, purchase_id: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            sequence,
            purchase_id: purchase_id.into(),
            timestamp: None,
            total_amount: Amount::zero(),
            cash_amount: Amount::zero(),
            currency: String::new(),
            shop_id: Hash::NULL,
            user_account: None,
            phone_hash: Hash::NULL,
            details: Vec::new(),
            sender: Address::default(),
        }
    }

    /// Only needed for testing schema upgrades.
    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn amounts(mut self, total: Amount, cash: Amount) -> Self {
        self.total_amount = total;
        self.cash_amount = cash;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn shop_id(mut self, shop_id: Hash) -> Self {
        self.shop_id = shop_id;
        self
    }

    pub fn user_account(mut self, account: Address) -> Self {
        self.user_account = Some(account);
        self
    }

    pub fn phone_hash(mut self, phone_hash: Hash) -> Self {
        self.phone_hash = phone_hash;
        self
    }

    pub fn detail(mut self, detail: PurchaseDetails) -> Self {
        self.details.push(detail);
        self
    }

    pub fn details(mut self, details: Vec<PurchaseDetails>) -> Self {
        self.details = details;
        self
    }

    /// Normally overwritten by signing.
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::New(NewTransaction {
            version: self.version,
            sequence: self.sequence,
            purchase_id: self.purchase_id,
            timestamp: self.timestamp.unwrap_or_else(now_secs),
            total_amount: self.total_amount,
            cash_amount: self.cash_amount,
            currency: self.currency,
            shop_id: self.shop_id,
            user_account: self.user_account,
            phone_hash: self.phone_hash,
            details: self.details,
            sender: self.sender,
            signature: None,
        })
    }
}

// ---------------------------------------------------------------------------
// CancelTransactionBuilder
// ---------------------------------------------------------------------------

pub struct CancelTransactionBuilder {
    version: u16,
    sequence: u64,
    purchase_id: String,
    timestamp: Option<u64>,
    sender: Address,
}

impl CancelTransactionBuilder {
    pub fn new(sequence: u64, purchase_id: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            sequence,
            purchase_id: purchase_id.into(),
            timestamp: None,
            sender: Address::default(),
        }
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::Cancel(CancelTransaction {
            version: self.version,
            sequence: self.sequence,
            purchase_id: self.purchase_id,
            timestamp: self.timestamp.unwrap_or_else(now_secs),
            sender: self.sender,
            signature: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
