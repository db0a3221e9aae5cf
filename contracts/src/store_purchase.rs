//! # StorePurchase Contract
//!
//! Append-only registry of anchored block headers. The lifecycle is:
//!
//! 1. **Initialize** - the registry starts with a synthetic genesis record at
//!    height 0 whose hashes are all null.
//! 2. **Add** - each call appends exactly one record at `last_height + 1`
//!    whose `prev_hash` is the current tip's `cur_hash`, and emits an
//!    [`AddedBlock`] event.
//! 3. **Query** - records are looked up by height, by hash or as a range.
//!
//! Any other `add` is a height-sequence violation (revert code `3002`) and
//! leaves the registry untouched. Lookups that miss report not-found
//! (`3005`).
//!
//! [`StorePurchase`] is the pure state machine. [`ContractLedger`] wraps it
//! behind a lock, broadcasts events, optionally journals every accepted
//! record to disk, and implements the protocol's [`Ledger`] trait.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use purchase_protocol::crypto::hash::Hash;
use purchase_protocol::ledger::{Ledger, LedgerError, LedgerRecord};

/// Capacity of the event channel. Slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the on-disk journal. Contract-level rejections are
/// [`LedgerError`]s.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt journal entry on line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// A journal entry does not extend the records before it.
    #[error("journal entry on line {line} rejected: {source}")]
    Rejected { line: usize, source: LedgerError },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Emitted once per accepted `add`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedBlock {
    pub height: u64,
    pub cur_hash: Hash,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub cid: String,
}

impl From<&LedgerRecord> for AddedBlock {
    fn from(r: &LedgerRecord) -> Self {
        Self {
            height: r.height,
            cur_hash: r.cur_hash,
            prev_hash: r.prev_hash,
            merkle_root: r.merkle_root,
            timestamp: r.timestamp,
            cid: r.cid.clone(),
        }
    }
}

/// The contract state: records indexed by height (position) and hash.
///
/// Serializes as the plain record list. Deserializing replays every record
/// after genesis through [`StorePurchase::add`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<LedgerRecord>", into = "Vec<LedgerRecord>")]
pub struct StorePurchase {
    records: Vec<LedgerRecord>,
    by_hash: HashMap<Hash, u64>,
}

impl TryFrom<Vec<LedgerRecord>> for StorePurchase {
    type Error = LedgerError;

    fn try_from(records: Vec<LedgerRecord>) -> Result<Self, Self::Error> {
        let mut iter = records.into_iter();
        match iter.next() {
            Some(first) if first == LedgerRecord::genesis() => {}
            _ => return Err(LedgerError::HeightSequenceViolation { height: 0 }),
        }
        let mut state = StorePurchase::new();
        for record in iter {
            state.add(record)?;
        }
        Ok(state)
    }
}

impl From<StorePurchase> for Vec<LedgerRecord> {
    fn from(state: StorePurchase) -> Self {
        state.records
    }
}

impl Default for StorePurchase {
    fn default() -> Self {
        Self::new()
    }
}

impl StorePurchase {
    /// A registry holding only the genesis record.
    pub fn new() -> Self {
        let genesis = LedgerRecord::genesis();
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.cur_hash, 0);
        Self {
            records: vec![genesis],
            by_hash,
        }
    }

    /// Appends `record` and returns the event to publish.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::HeightSequenceViolation`] if `record.height` is
    /// not `last_height + 1`, or if `record.prev_hash` does not match the
    /// current tip's hash.
    pub fn add(&mut self, record: LedgerRecord) -> Result<AddedBlock, LedgerError> {
        self.check_next(&record)?;
        let event = AddedBlock::from(&record);
        self.by_hash.entry(record.cur_hash).or_insert(record.height);
        self.records.push(record);
        Ok(event)
    }

    /// Whether `record` would be accepted by [`StorePurchase::add`].
    pub fn check_next(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let tip = self.tip();
        if record.height != tip.height + 1 || record.prev_hash != tip.cur_hash {
            return Err(LedgerError::HeightSequenceViolation {
                height: record.height,
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if `height > last_height`.
    pub fn get_by_height(&self, height: u64) -> Result<&LedgerRecord, LedgerError> {
        usize::try_from(height)
            .ok()
            .and_then(|i| self.records.get(i))
            .ok_or_else(|| LedgerError::not_found(format!("height {height}")))
    }

    /// The null hash resolves to genesis.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if no record carries `hash`.
    pub fn get_by_hash(&self, hash: &Hash) -> Result<&LedgerRecord, LedgerError> {
        self.by_hash
            .get(hash)
            .and_then(|h| self.records.get(*h as usize))
            .ok_or_else(|| LedgerError::not_found(format!("hash {hash}")))
    }

    /// Records with heights in `[from, from + count)` that exist, ascending.
    pub fn get_by_from_height(&self, from: u64, count: u64) -> &[LedgerRecord] {
        let len = self.records.len();
        let start = usize::try_from(from).unwrap_or(len).min(len);
        let end = usize::try_from(from.saturating_add(count))
            .unwrap_or(len)
            .min(len);
        &self.records[start..end]
    }

    /// Number of records, genesis included. Never zero.
    pub fn size(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn last_height(&self) -> u64 {
        self.tip().height
    }

    fn tip(&self) -> &LedgerRecord {
        // `records` always holds at least genesis.
        &self.records[self.records.len() - 1]
    }
}

// ---------------------------------------------------------------------------
// ContractLedger
// ---------------------------------------------------------------------------

/// Thread-safe, optionally durable host for [`StorePurchase`].
///
/// With a journal path every accepted record is appended to the file as one
/// JSON line and synced before `add` returns. Opening the same path later
/// replays the journal through [`StorePurchase::add`].
pub struct ContractLedger {
    state: RwLock<StorePurchase>,
    events: broadcast::Sender<AddedBlock>,
    journal: Option<PathBuf>,
}

impl Default for ContractLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ContractLedger {
    pub fn in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StorePurchase::new()),
            events,
            journal: None,
        }
    }

    /// Open a journaled ledger, replaying `path` if it exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let mut state = StorePurchase::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: LedgerRecord =
                    serde_json::from_str(&line).map_err(|e| JournalError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    })?;
                // A write whose sync failed may be followed by its retry.
                if state.tip() == &record {
                    warn!(line = i + 1, height = record.height, "skipping repeated journal entry");
                    continue;
                }
                state.add(record).map_err(|source| JournalError::Rejected {
                    line: i + 1,
                    source,
                })?;
            }
        }

        info!(
            path = %path.display(),
            last_height = state.last_height(),
            "contract ledger opened"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            state: RwLock::new(state),
            events,
            journal: Some(path),
        })
    }

    /// Receive an [`AddedBlock`] for every record accepted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AddedBlock> {
        self.events.subscribe()
    }

    /// Copy of the current contract state.
    pub fn snapshot(&self) -> StorePurchase {
        self.state.read().clone()
    }

    fn append_journal(path: &Path, record: &LedgerRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)
            .map_err(|e| LedgerError::Transport(format!("journal encode: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LedgerError::Transport(format!("journal open: {e}")))?;
        let len = file
            .metadata()
            .map_err(|e| LedgerError::Transport(format!("journal open: {e}")))?
            .len();
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.sync_data()) {
            if let Err(trunc) = file.set_len(len) {
                warn!(error = %trunc, "failed to roll back journal write");
            }
            return Err(LedgerError::Transport(format!("journal write: {e}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for ContractLedger {
    async fn add(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        let event = {
            let mut state = self.state.write();
            state.check_next(&record)?;
            if let Some(path) = &self.journal {
                Self::append_journal(path, &record)?;
            }
            state.add(record)?
        };

        debug!(height = event.height, hash = %event.cur_hash, "block header added");
        // No subscribers is fine.
        let _ = self.events.send(event);
        Ok(())
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerRecord, LedgerError> {
        self.state.read().get_by_height(height).cloned()
    }

    async fn get_by_hash(&self, hash: Hash) -> Result<LedgerRecord, LedgerError> {
        self.state.read().get_by_hash(&hash).cloned()
    }

    async fn get_by_from_height(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        Ok(self.state.read().get_by_from_height(from, count).to_vec())
    }

    async fn size(&self) -> Result<u64, LedgerError> {
        Ok(self.state.read().size())
    }

    async fn get_last_height(&self) -> Result<u64, LedgerError> {
        Ok(self.state.read().last_height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(height: u64, prev_hash: Hash) -> LedgerRecord {
        LedgerRecord {
            height,
            cur_hash: Hash::new([height as u8; 32]),
            prev_hash,
            merkle_root: Hash::new([0xAB; 32]),
            timestamp: 1_669_702_553 + height,
            cid: format!("cid-{height}"),
        }
    }

    #[test]
    fn starts_with_genesis() {
        let sp = StorePurchase::new();
        assert_eq!(sp.size(), 1);
        assert_eq!(sp.last_height(), 0);
        assert_eq!(sp.get_by_hash(&Hash::NULL).unwrap().height, 0);
    }

    #[test]
    fn add_emits_event() {
        let mut sp = StorePurchase::new();
        let event = sp.add(record(1, Hash::NULL)).unwrap();
        assert_eq!(event.height, 1);
        assert_eq!(event.cid, "cid-1");
        assert_eq!(sp.size(), 2);
    }

    #[test]
    fn broken_link_is_a_sequence_violation() {
        let mut sp = StorePurchase::new();
        sp.add(record(1, Hash::NULL)).unwrap();
        assert_eq!(
            sp.add(record(2, Hash::NULL)).unwrap_err(),
            LedgerError::HeightSequenceViolation { height: 2 }
        );
        assert_eq!(sp.size(), 2);
    }

    #[test]
    fn range_is_clipped() {
        let mut sp = StorePurchase::new();
        sp.add(record(1, Hash::NULL)).unwrap();
        assert_eq!(sp.get_by_from_height(0, 10).len(), 2);
        assert_eq!(sp.get_by_from_height(1, 1)[0].height, 1);
        assert!(sp.get_by_from_height(5, 3).is_empty());
        assert_eq!(sp.get_by_from_height(1, u64::MAX).len(), 1);
    }

    #[test]
    fn serde_replays_records() {
        let mut sp = StorePurchase::new();
        let first = record(1, Hash::NULL);
        let hash = first.cur_hash;
        sp.add(first.clone()).unwrap();

        let json = serde_json::to_string(&sp).unwrap();
        let restored: StorePurchase = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get_by_hash(&hash).unwrap().height, 1);

        let gap = serde_json::to_string(&vec![LedgerRecord::genesis(), record(2, hash)]).unwrap();
        assert!(serde_json::from_str::<StorePurchase>(&gap).is_err());

        let headless = serde_json::to_string(&vec![first]).unwrap();
        assert!(serde_json::from_str::<StorePurchase>(&headless).is_err());
    }
}
