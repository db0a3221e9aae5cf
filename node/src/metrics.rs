//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] under the
//! `purchase` namespace.
//!
//! Pool depth and ledger height are sampled from storage at scrape time; the
//! counters are driven by the API handlers and the block producer (through
//! [`ProductionObserver`]).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use purchase_protocol::network::producer::{ProducerError, ProductionObserver};
use purchase_protocol::storage::block::Block;
use purchase_protocol::storage::db::PurchaseDB;

const NAMESPACE: &str = "purchase";

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub transactions_admitted_total: IntCounter,
    pub sequence_rejections_total: IntCounter,
    pub blocks_anchored_total: IntCounter,
    pub anchor_failures_total: IntCounter,
    pub pending_transactions: IntGauge,
    pub ledger_height: IntGauge,
    pub anchor_latency_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.into()), None)?;

        let transactions_admitted_total = counter(
            &registry,
            "transactions_admitted_total",
            "Transactions accepted into the pool",
        )?;
        let sequence_rejections_total = counter(
            &registry,
            "sequence_rejections_total",
            "Submissions rejected for carrying an unexpected sequence",
        )?;
        let blocks_anchored_total = counter(
            &registry,
            "blocks_anchored_total",
            "Blocks accepted by the ledger and committed locally",
        )?;
        let anchor_failures_total = counter(
            &registry,
            "anchor_failures_total",
            "Production runs that failed to anchor their block",
        )?;
        let pending_transactions = gauge(
            &registry,
            "pending_transactions",
            "Admitted transactions not yet anchored",
        )?;
        let ledger_height = gauge(
            &registry,
            "ledger_height",
            "Height of the last block anchored by this node",
        )?;

        let anchor_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "anchor_latency_seconds",
                "Time from submitting a block to the ledger until it is acknowledged",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(anchor_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            transactions_admitted_total,
            sequence_rejections_total,
            blocks_anchored_total,
            anchor_failures_total,
            pending_transactions,
            ledger_height,
            anchor_latency_seconds,
        })
    }

    /// Refresh the storage-backed gauges.
    pub fn sample(&self, db: &PurchaseDB) {
        self.pending_transactions.set(db.pending_count() as i64);
        if let Ok(tip) = db.get_chain_tip() {
            self.ledger_height.set(tip.height as i64);
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl ProductionObserver for NodeMetrics {
    fn block_anchored(&self, block: &Block, latency: Duration) {
        self.blocks_anchored_total.inc();
        self.ledger_height.set(block.height() as i64);
        self.anchor_latency_seconds.observe(latency.as_secs_f64());
    }

    fn anchor_failed(&self, _height: u64, _error: &ProducerError) {
        self.anchor_failures_total.inc();
    }
}

/// State for the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<NodeMetrics>,
    pub db: PurchaseDB,
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state.metrics.sample(&state.db);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purchase_protocol::crypto::hash::Hash;

    #[test]
    fn registers_under_namespace() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.transactions_admitted_total.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("purchase_transactions_admitted_total 1"));
        assert!(text.contains("purchase_anchor_latency_seconds_bucket"));
    }

    #[test]
    fn observer_updates_counters() {
        let metrics = NodeMetrics::new().unwrap();
        let block = Block::create_at(Hash::NULL, 0, vec![], 1);
        metrics.block_anchored(&block, Duration::from_millis(120));
        assert_eq!(metrics.blocks_anchored_total.get(), 1);
        assert_eq!(metrics.ledger_height.get(), 1);
        assert_eq!(metrics.anchor_latency_seconds.get_sample_count(), 1);
    }

    #[test]
    fn sample_reads_storage() {
        let metrics = NodeMetrics::new().unwrap();
        let db = PurchaseDB::open_temporary().unwrap();
        metrics.sample(&db);
        assert_eq!(metrics.pending_transactions.get(), 0);
        assert_eq!(metrics.ledger_height.get(), 0);
    }
}
