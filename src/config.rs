// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Node configuration: TOML file plus environment overrides. Unknown
//! environment variables are ignored.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::mempool::MempoolConfig;

/// Environment variables honoured at startup.
pub const ENV_BLOB_DIR: &str = "ANIMICA_BLOB_DIR";
pub const ENV_DB_PATH: &str = "ANIMICA_DB_PATH";
pub const ENV_CHAIN_ID: &str = "ANIMICA_CHAIN_ID";
pub const ENV_RPC_LISTEN: &str = "ANIMICA_RPC_LISTEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaConfig {
    pub max_blob_bytes: usize,
    pub data_shards: u32,
    pub total_shards: u32,
    pub default_samples: u64,
    pub max_samples: u64,
}

impl Default for DaConfig {
    fn default() -> Self {
        Self {
            max_blob_bytes: 8 << 20,
            data_shards: 4,
            total_shards: 8,
            default_samples: 16,
            max_samples: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain_id: u64,
    pub rpc_listen: SocketAddr,
    /// Blob storage directory (objects tree lives underneath).
    pub blob_dir: PathBuf,
    /// Root directory for the durable KV databases.
    pub db_path: PathBuf,
    pub da: DaConfig,
    pub mempool: MempoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_listen: "127.0.0.1:8545".parse().expect("valid default addr"),
            blob_dir: PathBuf::from("./data/blobs"),
            db_path: PathBuf::from("./data/db"),
            da: DaConfig::default(),
            mempool: MempoolConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Apply `ANIMICA_*` environment overrides. Malformed values are
    /// reported; absent variables leave the file/default values in place.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(dir) = std::env::var(ENV_BLOB_DIR) {
            self.blob_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(chain_id) = std::env::var(ENV_CHAIN_ID) {
            self.chain_id = chain_id
                .parse()
                .map_err(|e| anyhow::anyhow!("{ENV_CHAIN_ID}={chain_id}: {e}"))?;
        }
        if let Ok(listen) = std::env::var(ENV_RPC_LISTEN) {
            self.rpc_listen = listen
                .parse()
                .map_err(|e| anyhow::anyhow!("{ENV_RPC_LISTEN}={listen}: {e}"))?;
        }
        Ok(())
    }

    /// Load the configuration: file (if given), then environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}

/// Install the global tracing subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
