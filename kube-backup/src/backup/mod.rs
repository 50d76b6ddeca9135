//! Backup runs.
//!
//! A run refreshes discovery, derives the scope filter, cohabitation decisions
//! and action selectors, then walks resource types in priority order. Items
//! are processed one at a time; only volume snapshots run concurrently.

pub mod item;
pub mod snapshot;

pub use item::{BackedUpItems, ItemBackupper, ResolvedAction};
pub use snapshot::SnapshotOrchestrator;

use crate::archive::ArchiveWriter;
use crate::client::DynamicClient;
use crate::cohabitation::CohabitationResolver;
use crate::discovery::{ApiResource, DiscoveryHelper};
use crate::filter::ScopeFilter;
use crate::model::{BackupRequest, ResourceIdentifier};
use crate::plugin::PluginRegistry;
use crate::utils::errors::Result;
use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Bound on every volume snapshotter call.
    pub snapshot_timeout: Duration,
    pub max_concurrent_snapshots: usize,
    /// zstd level for the archive.
    pub compression_level: i32,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            snapshot_timeout: Duration::from_secs(600),
            max_concurrent_snapshots: 4,
            compression_level: 3,
        }
    }
}

/// What a successful run hands back besides the updated request.
#[derive(Debug)]
pub struct BackupOutcome<W> {
    pub writer: W,
    /// Archived items in archive order.
    pub items_written: Vec<ResourceIdentifier>,
}

pub struct Backupper {
    discovery: DiscoveryHelper,
    client: Arc<dyn DynamicClient>,
    plugins: Arc<PluginRegistry>,
    options: BackupOptions,
}

impl Backupper {
    pub fn new(
        discovery: DiscoveryHelper,
        client: Arc<dyn DynamicClient>,
        plugins: Arc<PluginRegistry>,
        options: BackupOptions,
    ) -> Self {
        Self {
            discovery,
            client,
            plugins,
            options,
        }
    }

    /// Run one backup, streaming the archive into `writer`.
    ///
    /// Snapshot records, warnings and non-fatal item errors are recorded on
    /// `request`. A fatal error aborts the run; whatever was already written
    /// to `writer` is not a valid archive.
    pub async fn backup<W: Write + Send>(
        &mut self,
        request: &mut BackupRequest,
        writer: W,
    ) -> Result<BackupOutcome<W>> {
        let started = Utc::now();
        info!(backup = %request.spec.name, "Starting backup");

        self.discovery.refresh().await?;
        let discovery = &self.discovery;
        let order: Vec<ApiResource> = discovery.sorted_resources().in_backup_order().cloned().collect();

        let mut warnings = Vec::new();
        let filter = ScopeFilter::new(discovery, &request.spec)?;
        for name in filter.unresolved_resources() {
            warnings.push(format!("unknown resource {:?} in backup spec ignored", name));
        }
        let cohabitation = CohabitationResolver::new(discovery);
        let actions =
            item::resolve_actions(discovery, self.plugins.item_actions(), &mut warnings).await?;
        let snapshots = SnapshotOrchestrator::new(self.plugins.clone(), request, &self.options);
        let archive = ArchiveWriter::new(writer, self.options.compression_level, started)?;

        let mut items = ItemBackupper {
            spec: &request.spec,
            discovery,
            client: self.client.clone(),
            filter,
            cohabitation,
            actions,
            snapshots,
            archive,
            backed_up: BackedUpItems::default(),
            written: Vec::new(),
            errors: Vec::new(),
        };

        for resource in &order {
            if let Err(e) = items.backup_resource(resource).await {
                error!(backup = %request.spec.name, error = %e, "Backup failed");
                return Err(e);
            }
        }

        let ItemBackupper {
            snapshots,
            archive,
            written,
            errors,
            ..
        } = items;
        let (volume_snapshots, snapshot_warnings) = snapshots.finish().await;
        let writer = archive.finish()?;
        warnings.extend(snapshot_warnings);

        request.volume_snapshots.extend(volume_snapshots);
        request.warnings.extend(warnings);
        request.errors.extend(errors);

        info!(
            backup = %request.spec.name,
            items = written.len(),
            snapshots = request.volume_snapshots.len(),
            warnings = request.warnings.len(),
            errors = request.errors.len(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Backup completed"
        );

        Ok(BackupOutcome {
            writer,
            items_written: written,
        })
    }
}
