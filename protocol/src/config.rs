//! # Protocol Configuration & Constants
//!
//! Every fixed number the ledger pipeline depends on lives here. Values that
//! change the canonical encoding (schema version, domain tags) are frozen:
//! bumping them changes every hash ever produced under the old value.
//!
//! Runtime-tunable knobs (batch size, retry budget, timeouts) are grouped in
//! [`ProducerConfig`] and [`AnchorConfig`], both of which have sane defaults
//! and are serde-friendly so the node binary can load them from TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Crate version string, reported by the node's `version` subcommand.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current schema version of the transaction canonical encoding.
///
/// Encoded as the first field of every transaction preimage, so two
/// transactions with the same visible fields but different schema versions
/// never share a hash.
pub const SCHEMA_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Number of decimal places used when scaling purchase amounts into integer
/// units. `1.5` becomes `1_500_000_000_000_000_000`.
pub const AMOUNT_DECIMALS: u32 = 18;

/// Decimal places of `providePercent`: percent × 100, so `12.34%` is `1234`.
pub const PERCENT_DECIMALS: u32 = 2;

// ---------------------------------------------------------------------------
// Hash Domains
// ---------------------------------------------------------------------------

/// BLAKE3 derive-key context for hashing user phone numbers.
pub const PHONE_HASH_CONTEXT: &str = "purchase-ledger 2024 user-phone v1";

// ---------------------------------------------------------------------------
// Ledger Revert Codes
// ---------------------------------------------------------------------------

/// Ledger code for `add` at a height other than `last_height + 1`.
pub const LEDGER_CODE_HEIGHT_SEQUENCE: i32 = 3002;

/// Ledger code for a height or hash with no stored record.
pub const LEDGER_CODE_NOT_FOUND: i32 = 3005;

// ---------------------------------------------------------------------------
// Block Production
// ---------------------------------------------------------------------------

/// Default pause between block production runs.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(14);

/// Default cap on transactions drained into one block.
pub const MAX_TXS_PER_BLOCK: usize = 64;

// ---------------------------------------------------------------------------
// Anchoring
// ---------------------------------------------------------------------------

/// Default number of attempts for a ledger call before giving up.
pub const ANCHOR_MAX_ATTEMPTS: u32 = 5;

/// Backoff before the first retry. Doubles on every subsequent attempt.
pub const ANCHOR_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling for the exponential backoff.
pub const ANCHOR_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Per-attempt deadline for a single ledger call.
pub const ANCHOR_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Tunables
// ---------------------------------------------------------------------------

/// Knobs for the periodic block producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Milliseconds to sleep between two production runs. The timer is
    /// re-armed only after a run completes.
    pub interval_ms: u64,
    /// Maximum number of pending transactions per block.
    pub max_txs_per_block: usize,
    /// Produce (and anchor) a block even when nothing is pending.
    pub produce_empty_blocks: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_ms: BLOCK_INTERVAL.as_millis() as u64,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            produce_empty_blocks: false,
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Retry policy for the anchoring client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Deadline for each individual attempt, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            max_attempts: ANCHOR_MAX_ATTEMPTS,
            initial_backoff_ms: ANCHOR_INITIAL_BACKOFF.as_millis() as u64,
            max_backoff_ms: ANCHOR_MAX_BACKOFF.as_millis() as u64,
            request_timeout_ms: ANCHOR_REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

impl AnchorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff to wait after the `attempt`-th failure (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_ceiling() {
        let cfg = AnchorConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            request_timeout_ms: 50,
        };
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff_for(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff_for(4), Duration::from_millis(800));
        assert_eq!(cfg.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(cfg.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn defaults_match_constants() {
        let producer = ProducerConfig::default();
        assert_eq!(producer.interval(), BLOCK_INTERVAL);
        assert_eq!(producer.max_txs_per_block, MAX_TXS_PER_BLOCK);

        let anchor = AnchorConfig::default();
        assert_eq!(anchor.max_attempts, ANCHOR_MAX_ATTEMPTS);
        assert_eq!(anchor.request_timeout(), ANCHOR_REQUEST_TIMEOUT);
    }
}
