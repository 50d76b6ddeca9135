//! Configuration for the kube-backup CLI.
//!
//! Loaded from a TOML file; every section is optional.

use crate::backup::BackupOptions;
use crate::model::{BackupSpec, SnapshotLocation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub backup: BackupSpec,
    pub snapshot_locations: Vec<SnapshotLocation>,
    pub snapshots: SnapshotConfig,
    pub archive: ArchiveConfig,
    pub rpc: RpcConfig,
    pub plugins: Vec<PluginEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Bound on each volume snapshotter call
    #[serde(default = "default_snapshot_timeout_secs")]
    pub timeout_secs: u64,

    /// Snapshot requests in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-call timeout for remote plugins
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    ItemAction,
    VolumeSnapshotter,
}

/// A plugin served by a remote plugin host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEndpoint {
    pub name: String,
    pub kind: PluginKind,
    /// WebSocket URL of the plugin host, e.g. `ws://127.0.0.1:9700/ws/plugins`
    pub url: String,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_snapshot_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent() -> usize {
    4
}

fn default_compression_level() -> i32 {
    3
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_snapshot_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            snapshot_timeout: Duration::from_secs(self.snapshots.timeout_secs),
            max_concurrent_snapshots: self.snapshots.max_concurrent,
            compression_level: self.archive.compression_level,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }
}
