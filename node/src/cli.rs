//! # CLI Interface
//!
//! Defines the command-line argument structure for `purchase-node` using
//! `clap` derive. Supports five subcommands: `run`, `init`, `status`,
//! `loadgen` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::NodeConfig;
use crate::logging::LogFormat;

/// Purchase ledger node.
///
/// Accepts signed purchase and cancellation records over HTTP, orders them
/// by sequence, batches them into blocks and anchors each block header on
/// the StorePurchase ledger.
#[derive(Parser, Debug)]
#[command(
    name = "purchase-node",
    about = "Purchase ledger node",
    version,
    propagate_version = true
)]
pub struct PurchaseNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory, a default config and a manager key.
    Init(InitArgs),
    /// Query the status of a running node.
    Status(StatusArgs),
    /// Drive a running node with random purchases and cancellations.
    Loadgen(LoadgenArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand. Flags override the config file.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory
    /// and falls back to defaults if there is none.
    #[arg(long, short = 'c', env = "PURCHASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the database, ledger journal and manager key.
    #[arg(long, short = 'd', env = "PURCHASE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Port for the HTTP API.
    #[arg(long, short = 'p', env = "PURCHASE_PORT")]
    pub port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "PURCHASE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// JSON-RPC endpoint of a remote StorePurchase ledger. Without it the
    /// node hosts the ledger itself.
    #[arg(long, env = "PURCHASE_LEDGER_URL")]
    pub ledger_url: Option<String>,

    /// Shared secret required on every write request.
    #[arg(long, env = "PURCHASE_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Hex-encoded manager secret key.
    ///
    /// **Never pass this flag in production**: use the key file instead.
    #[arg(long, env = "PURCHASE_MANAGER_KEY", hide_env_values = true)]
    pub manager_key: Option<String>,

    /// Milliseconds between block production runs.
    #[arg(long, env = "PURCHASE_BLOCK_INTERVAL_MS")]
    pub block_interval_ms: Option<u64>,

    /// Log output format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl RunArgs {
    /// The config file named by `--config`, else `config.toml` in the data
    /// directory if present.
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        let dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| NodeConfig::default().server.data_dir);
        let candidate = dir.join("config.toml");
        candidate.exists().then_some(candidate)
    }

    /// Apply every flag that was given on top of `config`.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(dir) = &self.data_dir {
            config.server.data_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(port) = self.metrics_port {
            config.server.metrics_port = port;
        }
        if let Some(url) = &self.ledger_url {
            config.ledger.url = Some(url.clone());
        }
        if let Some(key) = &self.access_key {
            config.authorization.access_key = key.clone();
        }
        if let Some(key) = &self.manager_key {
            config.signer.manager_key = Some(key.clone());
        }
        if let Some(ms) = self.block_interval_ms {
            config.producer.interval_ms = ms;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "PURCHASE_DATA_DIR", default_value = "./purchase_data")]
    pub data_dir: PathBuf,

    /// Overwrite an existing config and manager key.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running node.
    #[arg(long, env = "PURCHASE_NODE_URL", default_value = "http://127.0.0.1:3000")]
    pub url: String,
}

/// Arguments for the `loadgen` subcommand.
#[derive(Parser, Debug)]
pub struct LoadgenArgs {
    /// Base URL of the target node.
    #[arg(long, env = "PURCHASE_NODE_URL", default_value = "http://127.0.0.1:3000")]
    pub url: String,

    /// Access key the target node expects.
    #[arg(long, env = "PURCHASE_ACCESS_KEY", hide_env_values = true)]
    pub access_key: String,

    /// Shortest pause between two submissions, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub min_interval: u64,

    /// Longest pause between two submissions, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub max_interval: u64,

    /// Stop after this many accepted submissions. Runs until interrupted
    /// when omitted.
    #[arg(long)]
    pub count: Option<u64>,
}
