//! # PurchaseDB - Persistent Storage Engine
//!
//! The persistence layer for the purchase ledger, built on sled's embedded
//! key-value store. Everything the pool and the block producer must not
//! lose across a restart flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                  | Value                     |
//! |----------------|----------------------|---------------------------|
//! | `pending`      | `sequence` (8B BE)   | `bincode(Transaction)`    |
//! | `purchases`    | `purchase_id` (UTF-8)| `bincode(PurchaseEntry)`  |
//! | `blocks`       | `height` (8B BE)     | `bincode(Block)`          |
//! | `block_hashes` | `hash` (32B)         | `height` (8B BE)          |
//! | `metadata`     | key (UTF-8)          | value (bytes)             |
//!
//! Sequences and heights are stored big-endian so that sled's lexicographic
//! ordering matches numeric ordering, which makes `pending` drain in
//! admission order.
//!
//! ## Atomicity
//!
//! Admission writes the pending transaction, the purchase index and the
//! last received sequence in one multi-tree sled transaction. Committing an
//! anchored block removes its transactions from `pending`, stores the block,
//! advances the chain tip and clears the in-flight marker, also atomically.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use super::block::Block;
use crate::crypto::hash::Hash;
use crate::transaction::{Amount, Transaction};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

impl From<TransactionError<DbError>> for DbError {
    fn from(e: TransactionError<DbError>) -> Self {
        match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => DbError::Sled(inner),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_LAST_RECEIVE_SEQUENCE: &[u8] = b"last_receive_sequence";
const META_CHAIN_TIP: &[u8] = b"chain_tip";
const META_IN_FLIGHT_BLOCK: &[u8] = b"in_flight_block";

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

fn abort(e: DbError) -> ConflictableTransactionError<DbError> {
    ConflictableTransactionError::Abort(e)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Height and hash of the last block anchored by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash,
}

impl Default for ChainTip {
    /// The genesis record: height 0, null hash.
    fn default() -> Self {
        Self {
            height: 0,
            hash: Hash::NULL,
        }
    }
}

/// Index entry tying a purchase id to the transactions that touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEntry {
    pub sequence: Option<u64>,
    pub anchored_height: Option<u64>,
    pub cancel_sequence: Option<u64>,
    pub cancel_anchored_height: Option<u64>,
}

/// Where a purchase currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PurchaseState {
    Pending,
    #[serde(rename_all = "camelCase")]
    Anchored { height: u64, block_hash: Hash },
}

/// Read model for purchase lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseStatus {
    pub purchase_id: String,
    pub sequence: u64,
    pub timestamp: u64,
    pub cash_amount: Amount,
    pub currency: String,
    pub status: PurchaseState,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// PurchaseDB
// ---------------------------------------------------------------------------

/// Persistent storage for pending transactions, anchored blocks and the
/// sequencing metadata.
///
/// sled trees are thread-safe; `PurchaseDB` is cheap to clone and can be
/// shared across tasks without external locking.
#[derive(Debug, Clone)]
pub struct PurchaseDB {
    db: Db,
    pending: Tree,
    purchases: Tree,
    blocks: Tree,
    block_hashes: Tree,
    metadata: Tree,
}

impl PurchaseDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let pending = db.open_tree("pending")?;
        let purchases = db.open_tree("purchases")?;
        let blocks = db.open_tree("blocks")?;
        let block_hashes = db.open_tree("block_hashes")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            pending,
            purchases,
            blocks,
            block_hashes,
            metadata,
        })
    }

    // -- Sequencing -----------------------------------------------------------

    /// Sequence of the last admitted transaction, `None` before the first.
    pub fn get_last_receive_sequence(&self) -> DbResult<Option<u64>> {
        self.metadata
            .get(META_LAST_RECEIVE_SEQUENCE)?
            .map(|bytes| decode_u64(&bytes))
            .transpose()
    }

    /// Overwrite the last received sequence. Recovery and bootstrapping only;
    /// admission updates it as part of [`PurchaseDB::admit_transaction`].
    pub fn set_last_receive_sequence(&self, sequence: u64) -> DbResult<()> {
        self.metadata
            .insert(META_LAST_RECEIVE_SEQUENCE, &sequence.to_be_bytes()[..])?;
        Ok(())
    }

    /// Persist an admitted transaction, its purchase index entry and the new
    /// last received sequence in one atomic step, then flush.
    pub fn admit_transaction(&self, tx: &Transaction) -> DbResult<()> {
        let sequence = tx.sequence();
        let seq_key = sequence.to_be_bytes();
        let tx_bytes = encode(tx)?;
        let purchase_key = tx.purchase_id().as_bytes();
        let is_cancel = tx.is_cancel();

        (&self.pending, &self.purchases, &self.metadata).transaction(
            |(pending, purchases, metadata)| {
                pending.insert(&seq_key[..], tx_bytes.clone())?;

                let mut entry: PurchaseEntry = match purchases.get(purchase_key)? {
                    Some(bytes) => decode(&bytes).map_err(abort)?,
                    None => PurchaseEntry::default(),
                };
                if is_cancel {
                    entry.cancel_sequence = Some(sequence);
                    entry.cancel_anchored_height = None;
                } else {
                    entry.sequence = Some(sequence);
                    entry.anchored_height = None;
                }
                purchases.insert(purchase_key, encode(&entry).map_err(abort)?)?;

                metadata.insert(META_LAST_RECEIVE_SEQUENCE, &seq_key[..])?;
                Ok(())
            },
        )?;

        self.db.flush()?;
        Ok(())
    }

    // -- Pending transactions ---------------------------------------------------

    /// Up to `max` pending transactions in admission order. Nothing is removed.
    pub fn pending_transactions(&self, max: usize) -> DbResult<Vec<Transaction>> {
        let mut txs = Vec::with_capacity(max.min(self.pending.len()));
        for result in self.pending.iter().take(max) {
            let (_key, value) = result?;
            txs.push(decode(&value)?);
        }
        Ok(txs)
    }

    pub fn get_pending(&self, sequence: u64) -> DbResult<Option<Transaction>> {
        self.pending
            .get(sequence.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // -- In-flight block --------------------------------------------------------

    /// Record `block` as submitted but not yet confirmed.
    pub fn put_in_flight(&self, block: &Block) -> DbResult<()> {
        self.metadata.insert(META_IN_FLIGHT_BLOCK, encode(block)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_in_flight(&self) -> DbResult<Option<Block>> {
        self.metadata
            .get(META_IN_FLIGHT_BLOCK)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    // -- Anchored blocks ----------------------------------------------------------

    /// Finalize a block the ledger accepted.
    ///
    /// Atomically removes its transactions from `pending`, marks their
    /// purchases anchored, stores the block and its hash index, advances the
    /// chain tip and clears the in-flight marker.
    pub fn commit_anchored(&self, block: &Block) -> DbResult<()> {
        let height = block.height();
        let height_key = height.to_be_bytes();
        let hash = block.hash();
        let block_bytes = encode(block)?;
        let tip_bytes = encode(&ChainTip { height, hash })?;

        (
            &self.pending,
            &self.purchases,
            &self.blocks,
            &self.block_hashes,
            &self.metadata,
        )
            .transaction(|(pending, purchases, blocks, block_hashes, metadata)| {
                for tx in &block.transactions {
                    pending.remove(&tx.sequence().to_be_bytes()[..])?;

                    let key = tx.purchase_id().as_bytes();
                    let mut entry: PurchaseEntry = match purchases.get(key)? {
                        Some(bytes) => decode(&bytes).map_err(abort)?,
                        None => PurchaseEntry::default(),
                    };
                    if tx.is_cancel() {
                        if entry.cancel_sequence == Some(tx.sequence()) {
                            entry.cancel_anchored_height = Some(height);
                        }
                    } else if entry.sequence == Some(tx.sequence()) {
                        entry.anchored_height = Some(height);
                    }
                    purchases.insert(key, encode(&entry).map_err(abort)?)?;
                }

                blocks.insert(&height_key[..], block_bytes.clone())?;
                block_hashes.insert(&hash.as_bytes()[..], &height_key[..])?;
                metadata.insert(META_CHAIN_TIP, tip_bytes.clone())?;
                metadata.remove(META_IN_FLIGHT_BLOCK)?;
                Ok(())
            })?;

        self.db.flush()?;
        Ok(())
    }

    /// Last anchored height and hash; genesis when nothing is anchored yet.
    pub fn get_chain_tip(&self) -> DbResult<ChainTip> {
        match self.metadata.get(META_CHAIN_TIP)? {
            Some(bytes) => decode(&bytes),
            None => Ok(ChainTip::default()),
        }
    }

    pub fn get_block(&self, height: u64) -> DbResult<Option<Block>> {
        self.blocks
            .get(height.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Two-step lookup: hash → height, then height → block.
    pub fn get_block_by_hash(&self, hash: &Hash) -> DbResult<Option<Block>> {
        match self.block_hashes.get(hash.as_bytes())? {
            Some(height_bytes) => self.get_block(decode_u64(&height_bytes)?),
            None => Ok(None),
        }
    }

    /// Blocks with heights in `start..=end`, ascending.
    pub fn get_block_range(&self, start: u64, end: u64) -> DbResult<Vec<Block>> {
        let mut blocks = Vec::new();
        for result in self.blocks.range(start.to_be_bytes()..=end.to_be_bytes()) {
            let (_key, value) = result?;
            blocks.push(decode(&value)?);
        }
        Ok(blocks)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    // -- Purchase lookups ---------------------------------------------------------

    /// Current status of a purchase, `None` if no purchase transaction with
    /// that id was ever admitted.
    pub fn get_purchase(&self, purchase_id: &str) -> DbResult<Option<PurchaseStatus>> {
        let Some(bytes) = self.purchases.get(purchase_id.as_bytes())? else {
            return Ok(None);
        };
        let entry: PurchaseEntry = decode(&bytes)?;
        let Some(sequence) = entry.sequence else {
            return Ok(None);
        };

        let (tx, status) = match entry.anchored_height {
            Some(height) => {
                let block = self
                    .get_block(height)?
                    .ok_or_else(|| DbError::NotFound(format!("block {height}")))?;
                let tx = block
                    .transactions
                    .iter()
                    .find(|tx| tx.sequence() == sequence)
                    .cloned()
                    .ok_or_else(|| {
                        DbError::NotFound(format!("sequence {sequence} in block {height}"))
                    })?;
                let status = PurchaseState::Anchored {
                    height,
                    block_hash: block.hash(),
                };
                (tx, status)
            }
            None => {
                let tx = self
                    .get_pending(sequence)?
                    .ok_or_else(|| DbError::NotFound(format!("pending sequence {sequence}")))?;
                (tx, PurchaseState::Pending)
            }
        };

        let Transaction::New(new) = tx else {
            return Err(DbError::Serialization(format!(
                "sequence {sequence} is not a purchase"
            )));
        };

        Ok(Some(PurchaseStatus {
            purchase_id: new.purchase_id,
            sequence,
            timestamp: new.timestamp,
            cash_amount: new.cash_amount,
            currency: new.currency,
            status,
            cancelled: entry.cancel_sequence.is_some(),
        }))
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
