//! The user-facing backup specification and the per-run request that carries
//! its results.

use super::volume::VolumeSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to back up. Mirrors the user's backup object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSpec {
    /// Backup name; used in snapshot records and provider tags.
    pub name: String,

    pub included_namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,

    /// Resource names: plural, singular, short name, kind or `resource.group`.
    /// `*` in the included list selects every resource type.
    pub included_resources: Vec<String>,
    pub excluded_resources: Vec<String>,

    /// Label selector expression, e.g. `app=web,tier in (front,back)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    /// `None` backs up cluster-scoped resources only for all-namespace backups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,

    /// `None` is treated as `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_volumes: Option<bool>,
}

impl BackupSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn snapshots_requested(&self) -> bool {
        self.snapshot_volumes != Some(false)
    }
}

/// Named configuration pointing at one snapshot provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLocation {
    pub name: String,
    /// Name of the volume snapshotter plugin serving this location.
    pub provider: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl SnapshotLocation {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            config: BTreeMap::new(),
        }
    }
}

/// One backup execution: the spec, the candidate snapshot locations, and the
/// results accumulated while running. Never shared between runs.
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub spec: BackupSpec,
    pub snapshot_locations: Vec<SnapshotLocation>,

    /// Snapshot records in dispatch order.
    pub volume_snapshots: Vec<VolumeSnapshot>,
    pub warnings: Vec<String>,
    /// Non-fatal item errors; fatal errors are returned from the run instead.
    pub errors: Vec<String>,
}

impl BackupRequest {
    pub fn new(spec: BackupSpec) -> Self {
        Self {
            spec,
            ..Self::default()
        }
    }

    pub fn with_snapshot_locations(mut self, locations: Vec<SnapshotLocation>) -> Self {
        self.snapshot_locations = locations;
        self
    }
}
