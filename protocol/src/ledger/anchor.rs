//! Retrying front-end for any [`Ledger`].
//!
//! Every call gets a per-attempt deadline. Transient failures and timeouts
//! are retried with capped exponential backoff until the attempt budget runs
//! out, at which point the caller sees [`LedgerError::SubmissionFailed`].
//! Contract-level errors (height violation, not found) pass through on the
//! first occurrence: repeating them cannot change the answer.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Ledger, LedgerError, LedgerRecord};
use crate::config::AnchorConfig;
use crate::crypto::hash::Hash;

#[derive(Clone)]
pub struct AnchoringClient {
    inner: Arc<dyn Ledger>,
    config: AnchorConfig,
}

impl AnchoringClient {
    pub fn new(inner: Arc<dyn Ledger>, config: AnchorConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.request_timeout();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Transport(format!(
                    "{op} timed out after {}ms",
                    timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, attempt, "ledger call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let backoff = self.config.backoff_for(attempt);
                        warn!(
                            op,
                            attempt,
                            max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "transient ledger failure, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(op, attempts = max_attempts, error = %last_error, "ledger retry budget exhausted");
        Err(LedgerError::SubmissionFailed {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[async_trait]
impl Ledger for AnchoringClient {
    async fn add(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        self.with_retry("add", || self.inner.add(record.clone()))
            .await
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerRecord, LedgerError> {
        self.with_retry("get_by_height", || self.inner.get_by_height(height))
            .await
    }

    async fn get_by_hash(&self, hash: Hash) -> Result<LedgerRecord, LedgerError> {
        self.with_retry("get_by_hash", || self.inner.get_by_hash(hash))
            .await
    }

    async fn get_by_from_height(
        &self,
        from: u64,
        count: u64,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.with_retry("get_by_from_height", || {
            self.inner.get_by_from_height(from, count)
        })
        .await
    }

    async fn size(&self) -> Result<u64, LedgerError> {
        self.with_retry("size", || self.inner.size()).await
    }

    async fn get_last_height(&self) -> Result<u64, LedgerError> {
        self.with_retry("get_last_height", || self.inner.get_last_height())
            .await
    }
}
