//! Sequenced transaction pool.
//!
//! Admits signed transactions in strict global order. The pool owns the
//! last accepted sequence: it is read from [`PurchaseDB`] on first use,
//! cached behind a mutex, and only advanced after the durable write
//! succeeds. Nothing else in the process writes it.
//!
//! ## Design
//!
//! - One `parking_lot::Mutex` covers check, persist and cache update, so two
//!   concurrent admissions of the same sequence cannot both succeed.
//! - Transactions stay in the `pending` tree until the block producer commits
//!   an anchored block containing them. `drain` only reads.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::db::{DbError, PurchaseDB};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PoolError {
    /// The transaction does not carry the next expected sequence. Nothing
    /// was stored.
    #[error("sequence is different from the expected value: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u64, actual: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

// ---------------------------------------------------------------------------
// TransactionPool
// ---------------------------------------------------------------------------

enum LastSequence {
    Unloaded,
    Loaded(Option<u64>),
}

pub struct TransactionPool {
    db: PurchaseDB,
    last: Mutex<LastSequence>,
}

impl TransactionPool {
    pub fn new(db: PurchaseDB) -> Self {
        Self {
            db,
            last: Mutex::new(LastSequence::Unloaded),
        }
    }

    fn load(&self, cached: &mut LastSequence) -> Result<Option<u64>, PoolError> {
        match cached {
            LastSequence::Loaded(v) => Ok(*v),
            LastSequence::Unloaded => {
                let v = self.db.get_last_receive_sequence()?;
                debug!(last_sequence = ?v, "loaded last received sequence");
                *cached = LastSequence::Loaded(v);
                Ok(v)
            }
        }
    }

    /// Next sequence the pool will accept.
    pub fn expected_sequence(&self) -> Result<u64, PoolError> {
        let mut guard = self.last.lock();
        Ok(next_after(self.load(&mut guard)?))
    }

    /// Admit `tx` if it carries exactly the next sequence.
    ///
    /// On success the transaction, its purchase index entry and the new
    /// last sequence are on disk before this returns.
    pub fn admit(&self, tx: &Transaction) -> Result<u64, PoolError> {
        let mut guard = self.last.lock();
        let expected = next_after(self.load(&mut guard)?);
        let actual = tx.sequence();

        if actual != expected {
            warn!(expected, actual, purchase_id = tx.purchase_id(), "sequence rejected");
            return Err(PoolError::SequenceMismatch { expected, actual });
        }

        self.db.admit_transaction(tx)?;
        *guard = LastSequence::Loaded(Some(actual));

        info!(
            sequence = actual,
            kind = tx.kind(),
            purchase_id = tx.purchase_id(),
            "transaction admitted"
        );
        Ok(actual)
    }

    /// Up to `max` pending transactions in admission order, without removal.
    pub fn drain(&self, max: usize) -> Result<Vec<Transaction>, PoolError> {
        let txs = self.db.pending_transactions(max)?;
        debug!(count = txs.len(), max, "drained pending transactions");
        Ok(txs)
    }

    /// Last accepted sequence, `None` before the first admission.
    pub fn last_sequence(&self) -> Result<Option<u64>, PoolError> {
        let mut guard = self.last.lock();
        self.load(&mut guard)
    }

    pub fn pending_count(&self) -> usize {
        self.db.pending_count()
    }

    pub fn db(&self) -> &PurchaseDB {
        &self.db
    }
}

fn next_after(last: Option<u64>) -> u64 {
    last.map_or(0, |s| s + 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::CancelTransactionBuilder;
    use std::sync::Arc;

    fn tx(seq: u64) -> Transaction {
        CancelTransactionBuilder::new(seq, format!("P{seq}"))
            .timestamp(1_700_000_000)
            .build()
    }

    fn pool() -> TransactionPool {
        TransactionPool::new(PurchaseDB::open_temporary().unwrap())
    }

    #[test]
    fn first_sequence_is_zero() {
        let pool = pool();
        assert_eq!(pool.last_sequence().unwrap(), None);
        assert_eq!(pool.expected_sequence().unwrap(), 0);
        assert_eq!(pool.admit(&tx(0)).unwrap(), 0);
        assert_eq!(pool.last_sequence().unwrap(), Some(0));
    }

    #[test]
    fn mismatch_leaves_state_untouched() {
        let pool = pool();
        pool.admit(&tx(0)).unwrap();

        match pool.admit(&tx(2)) {
            Err(PoolError::SequenceMismatch {
                expected: 1,
                actual: 2,
            }) => {}
            other => panic!("expected SequenceMismatch, got {:?}", other),
        }
        assert!(matches!(
            pool.admit(&tx(0)),
            Err(PoolError::SequenceMismatch {
                expected: 1,
                actual: 0
            })
        ));

        assert_eq!(pool.last_sequence().unwrap(), Some(0));
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.admit(&tx(1)).unwrap(), 1);
    }

    #[test]
    fn drain_preserves_order_and_contents() {
        let pool = pool();
        for seq in 0..5 {
            pool.admit(&tx(seq)).unwrap();
        }
        let drained = pool.drain(3).unwrap();
        assert_eq!(drained, vec![tx(0), tx(1), tx(2)]);
        assert_eq!(pool.pending_count(), 5);
    }

    #[test]
    fn resumes_from_durable_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let pool = TransactionPool::new(PurchaseDB::open(dir.path()).unwrap());
            pool.admit(&tx(0)).unwrap();
            pool.admit(&tx(1)).unwrap();
        }
        let pool = TransactionPool::new(PurchaseDB::open(dir.path()).unwrap());
        assert_eq!(pool.last_sequence().unwrap(), Some(1));
        assert!(pool.admit(&tx(1)).is_err());
        assert_eq!(pool.admit(&tx(2)).unwrap(), 2);
    }

    #[test]
    fn concurrent_admits_accept_each_sequence_once() {
        let pool = Arc::new(pool());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.admit(&tx(0)).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.last_sequence().unwrap(), Some(0));
    }
}
