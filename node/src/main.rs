// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Purchase Ledger Node
//!
//! Entry point for the `purchase-node` binary. Parses CLI arguments, loads
//! the TOML config, initializes logging and metrics, starts the block
//! producer, and serves the HTTP API.
//!
//! The binary supports five subcommands:
//!
//! - `run`     - start the node
//! - `init`    - create the data directory, config and manager key
//! - `status`  - query a running node's status endpoint
//! - `loadgen` - drive a running node with random traffic
//! - `version` - print build version information

mod api;
mod cli;
mod config;
mod loadgen;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use purchase_contracts::ContractLedger;
use purchase_protocol::crypto::keys::Keypair;
use purchase_protocol::ledger::{AnchoringClient, Ledger, RpcLedger};
use purchase_protocol::network::{BlockProducer, TransactionPool};
use purchase_protocol::storage::db::PurchaseDB;

use cli::{Commands, PurchaseNodeCli};
use config::NodeConfig;
use logging::LogFormat;
use metrics::{MetricsState, NodeMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PurchaseNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Loadgen(args) => {
            logging::init_logging(&NodeConfig::default().logging.level, LogFormat::Pretty);
            loadgen::run(args).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: API server, metrics endpoint and block producer.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut config = match args.config_path() {
        Some(path) => NodeConfig::from_toml_file(&path)?,
        None => NodeConfig::default(),
    };
    args.apply(&mut config);

    logging::init_logging(&config.logging.level, config.logging.format);

    if config.authorization.access_key.trim().is_empty() {
        bail!("authorization.access_key is not set; run `purchase-node init` or pass --access-key");
    }

    tracing::info!(
        port = config.server.port,
        metrics_port = config.server.metrics_port,
        data_dir = %config.server.data_dir.display(),
        ledger = config.ledger.url.as_deref().unwrap_or("embedded"),
        "starting purchase-node"
    );

    // --- Persistent storage ---
    let data_dir = config.server.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let db_path = data_dir.join("db");
    let db = PurchaseDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let tip = db.get_chain_tip()?;
    tracing::info!(
        path = %db_path.display(),
        height = tip.height,
        hash = %tip.hash,
        pending = db.pending_count(),
        "database opened"
    );

    // --- Manager key ---
    let manager = Arc::new(load_manager_key(&config)?);
    tracing::info!(address = %manager.address(), "manager key loaded");

    // --- Ledger ---
    let (ledger, served_ledger): (Arc<dyn Ledger>, Option<Arc<dyn Ledger>>) =
        match &config.ledger.url {
            Some(url) => (Arc::new(RpcLedger::new(url.clone())), None),
            None => {
                let journal = config.data_path(&config.ledger.journal);
                let contract: Arc<dyn Ledger> = Arc::new(
                    ContractLedger::open(&journal).with_context(|| {
                        format!("failed to open ledger journal {}", journal.display())
                    })?,
                );
                (contract.clone(), Some(contract))
            }
        };
    match ledger.get_last_height().await {
        Ok(height) if height < tip.height => tracing::warn!(
            ledger_height = height,
            local_height = tip.height,
            "ledger is behind the local chain"
        ),
        Ok(height) => tracing::info!(ledger_height = height, "ledger reachable"),
        Err(e) => tracing::warn!(error = %e, "ledger not reachable yet"),
    }
    let anchoring: Arc<dyn Ledger> = Arc::new(AnchoringClient::new(
        ledger,
        config.ledger.anchor.clone(),
    ));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.sample(&db);

    // --- Pool & producer ---
    let pool = Arc::new(TransactionPool::new(db.clone()));
    let producer = BlockProducer::new(pool.clone(), anchoring, config.producer.clone())
        .with_observer(node_metrics.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producer_task = tokio::spawn(async move { producer.run(shutdown_rx).await });

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            purchase_protocol::config::PROTOCOL_VERSION,
        ),
        access_key: config.authorization.access_key.trim().into(),
        pool,
        manager,
        metrics: node_metrics.clone(),
        ledger: served_ledger,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", config.server.address, config.server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(MetricsState {
            metrics: node_metrics,
            db,
        });
    let metrics_addr = format!("{}:{}", config.server.address, config.server.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping block producer");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = producer_task.await {
        tracing::error!(error = %e, "block producer task failed");
    }
    tracing::info!("purchase-node stopped");
    Ok(())
}

/// The manager key from config, else from the key file.
fn load_manager_key(config: &NodeConfig) -> Result<Keypair> {
    if let Some(hex_key) = &config.signer.manager_key {
        return Keypair::from_hex(hex_key.trim()).context("invalid signer.manager_key");
    }
    let path = config.data_path(&config.signer.key_file);
    let hex_key = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read manager key {}; run `purchase-node init` first",
            path.display()
        )
    })?;
    Keypair::from_hex(hex_key.trim())
        .with_context(|| format!("invalid manager key in {}", path.display()))
}

/// Initializes a new node data directory with a config and manager key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("purchase_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join("config.toml");
    let mut config = if config_path.exists() && !args.force {
        NodeConfig::from_toml_file(&config_path)?
    } else {
        let mut config = NodeConfig::default();
        config.server.data_dir = data_dir.clone();
        config
    };
    if config.authorization.access_key.is_empty() {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        config.authorization.access_key = hex::encode(secret);
    }
    std::fs::write(&config_path, config.to_toml_string()?)
        .with_context(|| format!("failed to write config to {}", config_path.display()))?;
    restrict_permissions(&config_path)?;

    let key_path = config.data_path(&config.signer.key_file);
    let keypair = if key_path.exists() && !args.force {
        let hex_key = std::fs::read_to_string(&key_path)?;
        Keypair::from_hex(hex_key.trim())
            .with_context(|| format!("invalid manager key in {}", key_path.display()))?
    } else {
        let keypair = Keypair::generate();
        std::fs::write(&key_path, keypair.secret_key_hex())
            .with_context(|| format!("failed to write manager key to {}", key_path.display()))?;
        restrict_permissions(&key_path)?;
        tracing::info!(key_path = %key_path.display(), "manager keypair generated");
        keypair
    };

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Manager key    : {}", key_path.display());
    println!("  Manager address: {}", keypair.address());
    println!("  Access key     : {}", config.authorization.access_key);

    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let client = loadgen::NodeClient::new(&args.url);
    let resp = client.get("/v1/status").await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("purchase-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", purchase_protocol::config::PROTOCOL_VERSION);
    println!("schema        {}", purchase_protocol::config::SCHEMA_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
