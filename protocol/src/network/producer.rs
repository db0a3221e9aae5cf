//! # Block Production Pipeline
//!
//! The `BlockProducer` turns pending transactions into anchored blocks.
//!
//! ## Pipeline Stages
//!
//! ```text
//! 1. SELECT   - reuse the in-flight block, or drain the pool and assemble one
//! 2. PERSIST  - store the block as in-flight before anything leaves the node
//! 3. ANCHOR   - ledger.add(header record with content id)
//! 4. COMMIT   - on success: clear pending, store block, advance the chain tip
//! ```
//!
//! A run that fails in stage 3 leaves the in-flight block untouched; the next
//! run resubmits exactly the same header. If the ledger answers a resubmission
//! with a height-sequence violation, the producer reads back the record at
//! that height: a matching hash means the earlier attempt landed and only the
//! acknowledgement was lost. Anything else means the ledger moved on without
//! us. The in-flight block is then rebuilt over the same transactions on top
//! of the ledger's last record and submitted on the next run; the refused
//! height is never retried.
//!
//! ## Scheduling
//!
//! [`BlockProducer::run`] calls `run_once`, then sleeps for the configured
//! interval, so a new run is armed only after the previous one finished.
//! `run_once` itself is guarded by an async mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::crypto::hash::Hash;
use crate::ledger::{Ledger, LedgerError, LedgerRecord, LedgerResultExt};
use crate::network::pool::{PoolError, TransactionPool};
use crate::storage::block::{Block, BlockError};
use crate::storage::db::DbError;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The ledger refused `height` and does not hold our block there. The
    /// batch was rebuilt at `rebased_to`.
    #[error("height conflict at {height}: local {local}, ledger {remote:?}; rebuilt at {rebased_to}")]
    HeightConflict {
        height: u64,
        local: Hash,
        remote: Option<Hash>,
        rebased_to: u64,
    },
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Hook for metrics. All methods default to no-ops.
pub trait ProductionObserver: Send + Sync {
    fn block_anchored(&self, _block: &Block, _latency: Duration) {}
    fn anchor_failed(&self, _height: u64, _error: &ProducerError) {}
}

struct NoopObserver;

impl ProductionObserver for NoopObserver {}

// ---------------------------------------------------------------------------
// BlockProducer
// ---------------------------------------------------------------------------

pub struct BlockProducer {
    pool: Arc<TransactionPool>,
    ledger: Arc<dyn Ledger>,
    config: ProducerConfig,
    observer: Arc<dyn ProductionObserver>,
    running: Mutex<()>,
}

impl BlockProducer {
    pub fn new(pool: Arc<TransactionPool>, ledger: Arc<dyn Ledger>, config: ProducerConfig) -> Self {
        Self {
            pool,
            ledger,
            config,
            observer: Arc::new(NoopObserver),
            running: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProductionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Block to submit this run: the in-flight one if present, otherwise a
    /// fresh block over the next pending batch.
    fn next_block(&self) -> Result<Option<Block>, ProducerError> {
        let db = self.pool.db();
        if let Some(block) = db.get_in_flight()? {
            debug!(height = block.height(), "resubmitting in-flight block");
            return Ok(Some(block));
        }

        let txs = self.pool.drain(self.config.max_txs_per_block)?;
        if txs.is_empty() && !self.config.produce_empty_blocks {
            return Ok(None);
        }

        let tip = db.get_chain_tip()?;
        let block = Block::create(tip.hash, tip.height, txs);
        db.put_in_flight(&block)?;
        info!(
            height = block.height(),
            txs = block.tx_count(),
            hash = %block.hash(),
            "block assembled"
        );
        Ok(Some(block))
    }

    /// One production run. Returns the block that was anchored, if any.
    pub async fn run_once(&self) -> Result<Option<Block>, ProducerError> {
        let _guard = self.running.lock().await;

        let Some(block) = self.next_block()? else {
            debug!("nothing pending, skipping block production");
            return Ok(None);
        };

        let started = Instant::now();
        match self.anchor(&block).await {
            Ok(()) => {
                self.pool.db().commit_anchored(&block)?;
                let latency = started.elapsed();
                info!(
                    height = block.height(),
                    txs = block.tx_count(),
                    latency_ms = latency.as_millis() as u64,
                    "block anchored"
                );
                self.observer.block_anchored(&block, latency);
                Ok(Some(block))
            }
            Err(e) => {
                warn!(height = block.height(), error = %e, "anchoring failed, block stays in flight");
                self.observer.anchor_failed(block.height(), &e);
                Err(e)
            }
        }
    }

    async fn anchor(&self, block: &Block) -> Result<(), ProducerError> {
        let record = LedgerRecord::from_header(&block.header, block.cid()?);
        match self.ledger.add(record).await {
            Ok(()) => Ok(()),
            Err(LedgerError::HeightSequenceViolation { height }) => {
                self.reconcile(block, height).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The ledger refused our height. Accept if it already holds us,
    /// otherwise rebuild the block on the ledger's tip.
    async fn reconcile(&self, block: &Block, height: u64) -> Result<(), ProducerError> {
        let local = block.hash();
        let remote = self.ledger.get_by_height(height).await.optional()?;
        if let Some(record) = &remote {
            if record.cur_hash == local {
                info!(height, hash = %local, "ledger already holds block, acknowledging");
                return Ok(());
            }
        }

        let rebuilt = self.rebase(block).await?;
        Err(ProducerError::HeightConflict {
            height,
            local,
            remote: remote.map(|r| r.cur_hash),
            rebased_to: rebuilt.height(),
        })
    }

    /// Re-derive the next height from the ledger and replace the in-flight
    /// block with one carrying the same transactions at that height.
    async fn rebase(&self, block: &Block) -> Result<Block, ProducerError> {
        let last = self.ledger.get_last_height().await?;
        let tip = self.ledger.get_by_height(last).await?;
        let rebuilt = Block::create(tip.cur_hash, tip.height, block.transactions.clone());
        self.pool.db().put_in_flight(&rebuilt)?;
        warn!(
            refused = block.height(),
            height = rebuilt.height(),
            prev_hash = %tip.cur_hash,
            "ledger moved on, in-flight block rebuilt on ledger tip"
        );
        Ok(rebuilt)
    }

    /// Produce blocks every `interval` until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.config.interval_ms, "block producer started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "block production run failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("block producer stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{Fault, FlakyLedger};
    use crate::storage::db::PurchaseDB;
    use crate::transaction::{CancelTransactionBuilder, Transaction};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tx(seq: u64) -> Transaction {
        CancelTransactionBuilder::new(seq, format!("P{seq}"))
            .timestamp(1_700_000_000)
            .build()
    }

    fn setup(cfg: ProducerConfig) -> (Arc<TransactionPool>, Arc<FlakyLedger>, BlockProducer) {
        let pool = Arc::new(TransactionPool::new(PurchaseDB::open_temporary().unwrap()));
        let ledger = Arc::new(FlakyLedger::new());
        let producer = BlockProducer::new(pool.clone(), ledger.clone(), cfg);
        (pool, ledger, producer)
    }

    fn default_setup() -> (Arc<TransactionPool>, Arc<FlakyLedger>, BlockProducer) {
        setup(ProducerConfig::default())
    }

    #[tokio::test]
    async fn empty_pool_produces_nothing() {
        let (pool, ledger, producer) = default_setup();
        assert!(producer.run_once().await.unwrap().is_none());
        assert_eq!(ledger.add_calls(), 0);
        assert!(pool.db().get_in_flight().unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_blocks_when_enabled() {
        let (_, ledger, producer) = setup(ProducerConfig {
            produce_empty_blocks: true,
            ..ProducerConfig::default()
        });
        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(block.tx_count(), 0);
        assert_eq!(block.header.merkle_root, Hash::NULL);
        assert_eq!(ledger.records().len(), 2);
    }

    #[tokio::test]
    async fn anchors_and_commits_batch() {
        let (pool, ledger, producer) = default_setup();
        for seq in 0..3 {
            pool.admit(&tx(seq)).unwrap();
        }

        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.header.prev_hash, Hash::NULL);
        assert_eq!(block.tx_count(), 3);

        let records = ledger.records();
        assert_eq!(records[1].cur_hash, block.hash());
        assert!(records[1].cid.starts_with("b3"));

        let db = pool.db();
        assert_eq!(pool.pending_count(), 0);
        assert!(db.get_in_flight().unwrap().is_none());
        assert_eq!(db.get_chain_tip().unwrap().height, 1);
        assert_eq!(db.get_block(1).unwrap().unwrap(), block);

        pool.admit(&tx(3)).unwrap();
        let next = producer.run_once().await.unwrap().unwrap();
        assert_eq!(next.height(), 2);
        assert_eq!(next.header.prev_hash, block.hash());
    }

    #[tokio::test]
    async fn batch_size_is_capped() {
        let (pool, _, producer) = setup(ProducerConfig {
            max_txs_per_block: 2,
            ..ProducerConfig::default()
        });
        for seq in 0..5 {
            pool.admit(&tx(seq)).unwrap();
        }
        assert_eq!(producer.run_once().await.unwrap().unwrap().tx_count(), 2);
        assert_eq!(pool.pending_count(), 3);
    }

    #[tokio::test]
    async fn failed_run_resubmits_same_block() {
        let (pool, ledger, producer) = default_setup();
        pool.admit(&tx(0)).unwrap();
        ledger.push_fault(Fault::Error(LedgerError::Transport("down".into())));

        assert!(matches!(
            producer.run_once().await,
            Err(ProducerError::Ledger(LedgerError::Transport(_)))
        ));
        let in_flight = pool.db().get_in_flight().unwrap().unwrap();
        assert_eq!(pool.pending_count(), 1);

        // Arrivals after the failure wait for the next block.
        pool.admit(&tx(1)).unwrap();

        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(block.hash(), in_flight.hash());
        assert_eq!(block.tx_count(), 1);
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(ledger.records().len(), 2);
    }

    #[tokio::test]
    async fn lost_ack_is_reconciled() {
        let (pool, ledger, producer) = default_setup();
        pool.admit(&tx(0)).unwrap();
        ledger.push_fault(Fault::DropAck);

        assert!(producer.run_once().await.is_err());
        assert_eq!(ledger.records().len(), 2);

        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(ledger.records()[1].cur_hash, block.hash());
        assert_eq!(ledger.records().len(), 2);
        assert_eq!(pool.db().get_chain_tip().unwrap().hash, block.hash());
        assert_eq!(pool.pending_count(), 0);
    }

    fn foreign(height: u64, prev_hash: Hash, fill: u8) -> LedgerRecord {
        LedgerRecord {
            height,
            cur_hash: Hash::new([fill; 32]),
            prev_hash,
            merkle_root: Hash::NULL,
            timestamp: 1,
            cid: String::new(),
        }
    }

    #[tokio::test]
    async fn foreign_record_rebuilds_on_ledger_tip() {
        let (pool, ledger, producer) = default_setup();
        ledger.add(foreign(1, Hash::NULL, 9)).await.unwrap();
        pool.admit(&tx(0)).unwrap();

        match producer.run_once().await {
            Err(ProducerError::HeightConflict {
                height: 1,
                remote,
                rebased_to: 2,
                ..
            }) => assert_eq!(remote, Some(Hash::new([9u8; 32]))),
            other => panic!("expected HeightConflict, got {other:?}"),
        }
        let in_flight = pool.db().get_in_flight().unwrap().unwrap();
        assert_eq!(in_flight.height(), 2);
        assert_eq!(in_flight.header.prev_hash, Hash::new([9u8; 32]));

        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(block.height(), 2);
        assert_eq!(block.hash(), in_flight.hash());
        assert_eq!(block.tx_count(), 1);
        assert_eq!(ledger.records().len(), 3);
        assert_eq!(ledger.records()[2].cur_hash, block.hash());
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.db().get_chain_tip().unwrap().height, 2);

        pool.admit(&tx(1)).unwrap();
        let next = producer.run_once().await.unwrap().unwrap();
        assert_eq!(next.height(), 3);
        assert_eq!(next.header.prev_hash, block.hash());
    }

    #[tokio::test]
    async fn refused_height_is_never_resubmitted() {
        let (pool, ledger, producer) = default_setup();
        ledger.add(foreign(1, Hash::NULL, 9)).await.unwrap();
        ledger
            .add(foreign(2, Hash::new([9u8; 32]), 8))
            .await
            .unwrap();
        pool.admit(&tx(0)).unwrap();

        assert!(matches!(
            producer.run_once().await,
            Err(ProducerError::HeightConflict { height: 1, rebased_to: 3, .. })
        ));
        // Ledger advances again before the rebuilt block goes out.
        ledger
            .add(foreign(3, Hash::new([8u8; 32]), 7))
            .await
            .unwrap();
        assert!(matches!(
            producer.run_once().await,
            Err(ProducerError::HeightConflict { height: 3, rebased_to: 4, .. })
        ));

        let block = producer.run_once().await.unwrap().unwrap();
        assert_eq!(block.height(), 4);
        assert_eq!(block.header.prev_hash, Hash::new([7u8; 32]));
        assert_eq!(ledger.add_calls(), 3 + 3);
        assert_eq!(pool.pending_count(), 0);
    }

    #[derive(Default)]
    struct Counting {
        anchored: AtomicU64,
        failed: AtomicU64,
    }

    impl ProductionObserver for Counting {
        fn block_anchored(&self, _block: &Block, _latency: Duration) {
            self.anchored.fetch_add(1, Ordering::Relaxed);
        }
        fn anchor_failed(&self, _height: u64, _error: &ProducerError) {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn observer_sees_outcomes() {
        let (pool, ledger, producer) = default_setup();
        let counting = Arc::new(Counting::default());
        let producer = producer.with_observer(counting.clone());

        pool.admit(&tx(0)).unwrap();
        ledger.push_fault(Fault::Error(LedgerError::Transport("down".into())));
        let _ = producer.run_once().await;
        producer.run_once().await.unwrap();

        assert_eq!(counting.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counting.anchored.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_shutdown() {
        let (pool, ledger, producer) = setup(ProducerConfig {
            interval_ms: 100,
            ..ProducerConfig::default()
        });
        pool.admit(&tx(0)).unwrap();

        let producer = Arc::new(producer);
        let (tx_shutdown, rx_shutdown) = watch::channel(false);
        let handle = tokio::spawn({
            let producer = producer.clone();
            async move { producer.run(rx_shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        tx_shutdown.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(ledger.records().len(), 2);
        assert_eq!(pool.pending_count(), 0);
    }
}
