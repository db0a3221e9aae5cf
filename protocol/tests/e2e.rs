//! End-to-end integration tests for the purchase pipeline.
//!
//! These tests exercise the full lifecycle from transaction construction
//! through anchoring: building, signing and verifying purchases, sequenced
//! admission, block production, Merkle inclusion proofs, ledger records and
//! the purchase status read model.
//!
//! Each test stands alone with its own temporary database and in-memory
//! ledger.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use purchase_protocol::config::{AnchorConfig, ProducerConfig};
use purchase_protocol::crypto::codec::hash_full;
use purchase_protocol::crypto::hash::{blake3_hash, phone_hash, Hash};
use purchase_protocol::crypto::keys::Keypair;
use purchase_protocol::ledger::{AnchoringClient, Ledger, LedgerError, LedgerRecord};
use purchase_protocol::network::pool::{PoolError, TransactionPool};
use purchase_protocol::network::producer::BlockProducer;
use purchase_protocol::storage::block::Block;
use purchase_protocol::storage::db::{PurchaseDB, PurchaseState};
use purchase_protocol::storage::merkle::{build_merkle_tree, merkle_proof, verify_merkle_proof};
use purchase_protocol::transaction::{
    sign_transaction, verify_transaction, Amount, CancelTransactionBuilder, NewTransactionBuilder,
    PurchaseDetails, Transaction,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Minimal append-only ledger. Fails the first `failures` adds with a
/// transport error.
struct MemoryLedger {
    records: Mutex<Vec<LedgerRecord>>,
    failures: Mutex<u32>,
}

impl MemoryLedger {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Self {
        Self {
            records: Mutex::new(vec![LedgerRecord::genesis()]),
            failures: Mutex::new(failures),
        }
    }

    fn records(&self) -> Vec<LedgerRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn add(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LedgerError::Transport("connection refused".into()));
            }
        }
        let mut records = self.records.lock();
        if record.height != records.len() as u64 {
            return Err(LedgerError::HeightSequenceViolation {
                height: record.height,
            });
        }
        records.push(record);
        Ok(())
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerRecord, LedgerError> {
        self.records
            .lock()
            .get(height as usize)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(format!("height {height}")))
    }

    async fn get_by_hash(&self, hash: Hash) -> Result<LedgerRecord, LedgerError> {
        self.records
            .lock()
            .iter()
            .find(|r| r.cur_hash == hash)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(format!("hash {hash}")))
    }

    async fn get_by_from_height(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        Ok(self
            .records
            .lock()
            .iter()
            .skip(from as usize)
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn size(&self) -> Result<u64, LedgerError> {
        Ok(self.records.lock().len() as u64)
    }

    async fn get_last_height(&self) -> Result<u64, LedgerError> {
        Ok(self.records.lock().len() as u64 - 1)
    }
}

fn shop() -> Hash {
    Hash::new(blake3_hash(b"shop-0001"))
}

fn purchase(seq: u64, id: &str, manager: &Keypair) -> Transaction {
    let tx = NewTransactionBuilder::new(seq, id)
        .timestamp(1_700_000_000 + seq)
        .amounts(Amount::from(12_000u64), Amount::from(10_000u64))
        .currency("krw")
        .shop_id(shop())
        .phone_hash(phone_hash("08201012341234"))
        .detail(PurchaseDetails::new("PD001", Amount::from(10_000u64), 10))
        .detail(PurchaseDetails::new("PD002", Amount::from(2_000u64), 5))
        .build();
    sign_transaction(&tx, manager)
}

fn cancel(seq: u64, id: &str, manager: &Keypair) -> Transaction {
    let tx = CancelTransactionBuilder::new(seq, id)
        .timestamp(1_700_000_100 + seq)
        .build();
    sign_transaction(&tx, manager)
}

fn producer(pool: &Arc<TransactionPool>, ledger: Arc<dyn Ledger>) -> BlockProducer {
    BlockProducer::new(pool.clone(), ledger, ProducerConfig::default())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn purchase_lifecycle_through_anchoring() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let ledger = Arc::new(MemoryLedger::new());
    let producer = producer(&pool, ledger.clone());

    let txs: Vec<Transaction> = (0..5)
        .map(|seq| purchase(seq, &format!("P{seq:04}"), &manager))
        .collect();
    for tx in &txs {
        assert!(verify_transaction(tx, Some(&manager.address())));
        pool.admit(tx).unwrap();
    }

    let db = pool.db();
    assert_eq!(
        db.get_purchase("P0002").unwrap().unwrap().status,
        PurchaseState::Pending
    );

    let block = producer.run_once().await.unwrap().unwrap();
    assert_eq!(block.transactions, txs);
    block.verify().unwrap();

    let records = ledger.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].cur_hash, block.hash());
    assert_eq!(records[1].merkle_root, block.header.merkle_root);
    assert_eq!(records[1].cid, block.cid().unwrap());

    let status = db.get_purchase("P0002").unwrap().unwrap();
    assert_eq!(status.sequence, 2);
    assert_eq!(status.currency, "krw");
    assert_eq!(status.cash_amount, Amount::from(10_000u64));
    assert_eq!(
        status.status,
        PurchaseState::Anchored {
            height: 1,
            block_hash: block.hash()
        }
    );
    assert!(!status.cancelled);
    assert!(db.get_purchase("P9999").unwrap().is_none());
}

#[tokio::test]
async fn cancellation_marks_purchase() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let ledger = Arc::new(MemoryLedger::new());
    let producer = producer(&pool, ledger.clone());

    pool.admit(&purchase(0, "P0000", &manager)).unwrap();
    producer.run_once().await.unwrap();

    pool.admit(&cancel(1, "P0000", &manager)).unwrap();
    assert!(pool.db().get_purchase("P0000").unwrap().unwrap().cancelled);

    let block = producer.run_once().await.unwrap().unwrap();
    assert_eq!(block.height(), 2);
    assert!(block.transactions[0].is_cancel());

    let status = pool.db().get_purchase("P0000").unwrap().unwrap();
    assert!(status.cancelled);
    assert!(matches!(status.status, PurchaseState::Anchored { height: 1, .. }));
}

#[tokio::test]
async fn out_of_order_admission_is_rejected() {
    let manager = Keypair::generate();
    let pool = TransactionPool::new(PurchaseDB::open_temporary().unwrap());

    pool.admit(&purchase(0, "P0000", &manager)).unwrap();
    match pool.admit(&purchase(5, "P0005", &manager)) {
        Err(PoolError::SequenceMismatch { expected, actual }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 5);
        }
        other => panic!("expected SequenceMismatch, got {:?}", other),
    }
    assert_eq!(pool.pending_count(), 1);
    assert!(pool.db().get_purchase("P0005").unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Chain linkage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consecutive_blocks_link_by_hash() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let ledger = Arc::new(MemoryLedger::new());
    let producer = BlockProducer::new(
        pool.clone(),
        ledger.clone(),
        ProducerConfig {
            max_txs_per_block: 4,
            ..ProducerConfig::default()
        },
    );

    for seq in 0..10 {
        pool.admit(&purchase(seq, &format!("P{seq:04}"), &manager))
            .unwrap();
    }

    let mut blocks: Vec<Block> = Vec::new();
    while let Some(block) = producer.run_once().await.unwrap() {
        blocks.push(block);
    }
    assert_eq!(
        blocks.iter().map(Block::tx_count).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );

    let records = ledger.records();
    for window in records.windows(2) {
        assert_eq!(window[1].prev_hash, window[0].cur_hash);
        assert_eq!(window[1].height, window[0].height + 1);
    }

    let stored = pool.db().get_block_range(1, 4).unwrap();
    assert_eq!(stored, blocks);
    assert_eq!(
        pool.db().get_block_by_hash(&blocks[1].hash()).unwrap(),
        Some(blocks[1].clone())
    );
}

#[tokio::test]
async fn stored_block_roundtrips_preserve_hash() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let producer = producer(&pool, Arc::new(MemoryLedger::new()));

    pool.admit(&purchase(0, "P0000", &manager)).unwrap();
    pool.admit(&cancel(1, "P0000", &manager)).unwrap();
    let block = producer.run_once().await.unwrap().unwrap();

    let json = serde_json::to_string(&block).unwrap();
    let from_json: Block = serde_json::from_str(&json).unwrap();
    assert_eq!(from_json, block);
    assert_eq!(from_json.hash(), block.hash());

    let bytes = bincode::serialize(&block).unwrap();
    let from_bincode: Block = bincode::deserialize(&bytes).unwrap();
    assert_eq!(from_bincode.hash(), block.hash());
    from_bincode.verify().unwrap();
}

#[tokio::test]
async fn inclusion_proof_for_anchored_transaction() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let producer = producer(&pool, Arc::new(MemoryLedger::new()));

    for seq in 0..7 {
        pool.admit(&purchase(seq, &format!("P{seq:04}"), &manager))
            .unwrap();
    }
    let block = producer.run_once().await.unwrap().unwrap();

    let leaves: Vec<Hash> = block.transactions.iter().map(hash_full).collect();
    let tree = build_merkle_tree(&leaves).unwrap();
    assert_eq!(tree.len(), 14);

    let path = merkle_proof(&tree, leaves.len(), 3).unwrap();
    assert!(verify_merkle_proof(
        &leaves[3],
        3,
        &path,
        &block.header.merkle_root
    ));
    assert!(!verify_merkle_proof(
        &leaves[4],
        3,
        &path,
        &block.header.merkle_root
    ));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn anchoring_client_absorbs_transient_failures() {
    let manager = Keypair::generate();
    let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
    let ledger = Arc::new(MemoryLedger::failing(2));
    let client = AnchoringClient::new(
        ledger.clone(),
        AnchorConfig {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 200,
            request_timeout_ms: 1_000,
        },
    );
    let producer = producer(&pool, Arc::new(client));

    pool.admit(&purchase(0, "P0000", &manager)).unwrap();
    let block = producer.run_once().await.unwrap().unwrap();
    assert_eq!(ledger.records()[1].cur_hash, block.hash());
}

#[tokio::test]
async fn restart_resumes_sequence_and_in_flight_block() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Keypair::generate();

    let in_flight_hash = {
        let pool = Arc::new(TransactionPool::new(PurchaseDB::open(dir.path()).unwrap()));
        let producer = producer(&pool, Arc::new(MemoryLedger::failing(1)));
        pool.admit(&purchase(0, "P0000", &manager)).unwrap();
        pool.admit(&purchase(1, "P0001", &manager)).unwrap();
        assert!(producer.run_once().await.is_err());
        pool.db().get_in_flight().unwrap().unwrap().hash()
    };

    let pool = Arc::new(TransactionPool::new(PurchaseDB::open(dir.path()).unwrap()));
    assert_eq!(pool.expected_sequence().unwrap(), 2);
    assert_eq!(pool.pending_count(), 2);

    let ledger = Arc::new(MemoryLedger::new());
    let block = producer(&pool, ledger.clone())
        .run_once()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(block.hash(), in_flight_hash);
    assert_eq!(pool.pending_count(), 0);
    assert_eq!(ledger.records().len(), 2);
}

#[test]
fn tampered_transaction_fails_verification() {
    let manager = Keypair::generate();
    let signed = purchase(0, "P0000", &manager);

    let Transaction::New(mut inner) = signed.clone() else {
        unreachable!()
    };
    inner.cash_amount = Amount::from(1u64);
    let tampered = Transaction::New(inner);

    assert!(verify_transaction(&signed, Some(&manager.address())));
    assert!(!verify_transaction(&tampered, Some(&manager.address())));
    assert!(!verify_transaction(&tampered, None));
}
