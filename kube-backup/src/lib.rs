//! Kube Backup Library
//!
//! Cluster resource backup core: discovery, scope filtering, item actions,
//! volume snapshots and archive packaging.

pub mod archive;
pub mod backup;
pub mod client;
pub mod cohabitation;
pub mod config;
pub mod discovery;
pub mod filter;
pub mod model;
pub mod plugin;
pub mod utils;

// Re-export commonly used types
pub use backup::{BackupOptions, BackupOutcome, Backupper};
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
