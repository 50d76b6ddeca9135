//! Error types for the backup core.

use thiserror::Error;

/// Failure talking to the cluster's discovery endpoint.
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    #[error("Discovery request failed: {0}")]
    Request(String),
}

/// Failure of a list or get call against the cluster.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Cluster request failed: {0}")]
    Request(String),

    #[error("Unknown resource type: {0}")]
    UnknownResource(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid label selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

impl SelectorError {
    pub fn new(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by or on behalf of a plugin. Panics and timeouts inside a
/// plugin are converted into these values, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin {plugin} failed: {message}")]
    Failed { plugin: String, message: String },

    #[error("Plugin {plugin} panicked during {operation}: {message}")]
    Panicked {
        plugin: String,
        operation: String,
        message: String,
    },

    #[error("Plugin {plugin} timed out after {timeout_ms}ms")]
    Timeout { plugin: String, timeout_ms: u64 },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin transport error: {0}")]
    Transport(String),

    #[error("Plugin protocol error: {0}")]
    Protocol(String),
}

impl PluginError {
    pub fn failed(plugin: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PluginError::Failed {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid archive entry: {0}")]
    InvalidEntry(String),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Invalid configuration for item action {plugin}: {source}")]
    ActionConfig {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("Item action {plugin} failed on {item}: {source}")]
    ActionExecute {
        plugin: String,
        item: String,
        #[source]
        source: PluginError,
    },

    #[error("Listing {resource} failed: {source}")]
    List {
        resource: String,
        #[source]
        source: ClientError,
    },

    #[error("Additional item {item} could not be backed up: {reason}")]
    AdditionalItem { item: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl BackupError {
    /// Fatal errors abort the run; the rest are recorded on the request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BackupError::AdditionalItem { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
