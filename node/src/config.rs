//! Node configuration with TOML file support.
//!
//! Every field has a serde default, so an empty file is a valid config. CLI
//! flags are applied on top of whatever the file provides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use purchase_protocol::config::{AnchorConfig, ProducerConfig};

use crate::logging::LogFormat;

/// Configuration for a purchase ledger node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub authorization: AuthorizationConfig,
    pub signer: SignerConfig,
    pub producer: ProducerConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the API and metrics listeners bind to.
    pub address: String,
    pub port: u16,
    pub metrics_port: u16,
    /// sled database directory.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3000,
            metrics_port: 3001,
            data_dir: PathBuf::from("./purchase_data"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Shared secret every write request must carry as `accessKey`.
    pub access_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Hex-encoded manager secret key. Takes precedence over `key_file`.
    pub manager_key: Option<String>,
    /// File holding the hex-encoded manager secret key, relative to the
    /// data directory unless absolute.
    pub key_file: PathBuf,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            manager_key: None,
            key_file: PathBuf::from("manager.key"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Remote JSON-RPC ledger. When unset the node hosts the StorePurchase
    /// contract itself and serves it on `POST /ledger`.
    pub url: Option<String>,
    /// Journal file of the embedded contract, relative to the data directory.
    pub journal: PathBuf,
    pub anchor: AnchorConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: None,
            journal: PathBuf::from("ledger.jsonl"),
            anchor: AnchorConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "purchase_node=info,purchase_protocol=info,purchase_contracts=info,tower_http=info"
                .to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `path` resolved against the data directory.
    pub fn data_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.server.data_dir.join(path)
        }
    }
}
