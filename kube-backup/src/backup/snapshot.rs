//! Volume snapshot orchestration for persistent volumes.
//!
//! Snapshot requests are provider I/O and run concurrently on a `JoinSet`,
//! bounded by a semaphore. Records are gathered by `finish` and returned in
//! dispatch order, along with the warnings raised while choosing backends.

use super::BackupOptions;
use crate::model::{BackupRequest, ResourceItem, SnapshotLocation, VolumeSnapshot, VolumeSnapshotSpec};
use crate::plugin::guard::call_guarded_with_timeout;
use crate::plugin::{PluginRegistry, VolumeSnapshotter};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pins a volume to one snapshot location by name.
pub const SNAPSHOT_LOCATION_ANNOTATION: &str = "backup.kube.io/snapshot-location";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const LEGACY_ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";
pub const BACKUP_TAG: &str = "backup.kube.io/backup";
pub const VOLUME_TAG: &str = "backup.kube.io/pv";

pub struct SnapshotOrchestrator {
    plugins: Arc<PluginRegistry>,
    backup_name: String,
    locations: Vec<SnapshotLocation>,
    enabled: bool,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    /// Initialised snapshotter per location name; `None` caches a failure.
    snapshotters: HashMap<String, Option<Arc<dyn VolumeSnapshotter>>>,
    /// Dispatched records, indexed by dispatch sequence.
    dispatched: Vec<VolumeSnapshot>,
    tasks: JoinSet<(usize, VolumeSnapshot)>,
    warnings: Vec<String>,
}

impl SnapshotOrchestrator {
    pub fn new(plugins: Arc<PluginRegistry>, request: &BackupRequest, options: &BackupOptions) -> Self {
        let locations = request.snapshot_locations.clone();
        let mut warnings = Vec::new();
        let enabled = if !request.spec.snapshots_requested() {
            info!(backup = %request.spec.name, "Volume snapshots disabled for this backup");
            false
        } else if locations.is_empty() {
            info!(backup = %request.spec.name, "No snapshot locations configured, volumes will not be snapshotted");
            false
        } else {
            for location in locations.iter().filter(|l| !plugins.has_volume_snapshotter(&l.provider)) {
                warn!(location = %location.name, provider = %location.provider, "No volume snapshotter registered for snapshot location");
                warnings.push(format!(
                    "snapshot location {}: no volume snapshotter registered for provider {}",
                    location.name, location.provider
                ));
            }
            locations.iter().any(|l| plugins.has_volume_snapshotter(&l.provider))
        };

        Self {
            plugins,
            backup_name: request.spec.name.clone(),
            locations,
            enabled,
            timeout: options.snapshot_timeout,
            semaphore: Arc::new(Semaphore::new(options.max_concurrent_snapshots.max(1))),
            snapshotters: HashMap::new(),
            dispatched: Vec::new(),
            tasks: JoinSet::new(),
            warnings,
        }
    }

    async fn snapshotter_for(&mut self, location: &SnapshotLocation) -> Option<Arc<dyn VolumeSnapshotter>> {
        if let Some(cached) = self.snapshotters.get(&location.name) {
            return cached.clone();
        }

        let snapshotter = match self.plugins.new_volume_snapshotter(&location.provider) {
            None => None,
            Some(mut snapshotter) => {
                let init = call_guarded_with_timeout(
                    &location.provider,
                    "init",
                    self.timeout,
                    snapshotter.init(&location.config),
                )
                .await;
                match init {
                    Ok(()) => Some(Arc::<dyn VolumeSnapshotter>::from(snapshotter)),
                    Err(e) => {
                        warn!(location = %location.name, provider = %location.provider, error = %e, "Failed to initialize volume snapshotter");
                        self.warnings.push(format!(
                            "snapshot location {}: failed to initialize volume snapshotter: {}",
                            location.name, e
                        ));
                        None
                    }
                }
            }
        };
        self.snapshotters
            .insert(location.name.clone(), snapshotter.clone());
        snapshotter
    }

    fn candidate_locations(&mut self, volume: &ResourceItem) -> Vec<SnapshotLocation> {
        match volume.annotation(SNAPSHOT_LOCATION_ANNOTATION) {
            Some(pinned) => {
                let matching: Vec<SnapshotLocation> = self
                    .locations
                    .iter()
                    .filter(|l| l.name == pinned)
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    warn!(name = volume.name(), location = pinned, "Volume pinned to unknown snapshot location");
                    self.warnings.push(format!(
                        "persistent volume {}: pinned to unknown snapshot location {}",
                        volume.name(),
                        pinned
                    ));
                }
                matching
            }
            None => self.locations.clone(),
        }
    }

    /// Dispatch a snapshot of `volume` if some location can take it.
    /// Volumes no backend claims are skipped without a record.
    pub async fn take_snapshot(&mut self, volume: &ResourceItem) {
        if !self.enabled {
            return;
        }

        let mut chosen = None;
        for location in self.candidate_locations(volume) {
            let Some(snapshotter) = self.snapshotter_for(&location).await else {
                continue;
            };
            let volume_id = call_guarded_with_timeout(
                &location.provider,
                "get_volume_id",
                self.timeout,
                snapshotter.get_volume_id(volume),
            )
            .await;
            match volume_id {
                Ok(Some(id)) if !id.is_empty() => {
                    chosen = Some((location, snapshotter, id));
                    break;
                }
                Ok(_) => {
                    debug!(name = volume.name(), location = %location.name, "Snapshotter does not handle this volume");
                }
                Err(e) => {
                    warn!(name = volume.name(), location = %location.name, error = %e, "Failed to resolve provider volume ID");
                    self.warnings.push(format!(
                        "persistent volume {}: snapshot location {} could not resolve volume ID: {}",
                        volume.name(),
                        location.name,
                        e
                    ));
                }
            }
        }

        let Some((location, snapshotter, volume_id)) = chosen else {
            info!(name = volume.name(), "Persistent volume is not supported by any snapshot location, skipping snapshot");
            return;
        };

        let az = volume
            .label(ZONE_LABEL)
            .or_else(|| volume.label(LEGACY_ZONE_LABEL))
            .unwrap_or_default()
            .to_string();

        let mut snapshot = VolumeSnapshot::new(VolumeSnapshotSpec {
            backup_name: self.backup_name.clone(),
            location: location.name.clone(),
            persistent_volume_name: volume.name().to_string(),
            provider_volume_id: volume_id.clone(),
            volume_az: az.clone(),
            ..Default::default()
        });
        if let Err(e) = snapshot.start() {
            error!(error = %e, "Snapshot record rejected start");
            return;
        }

        let tags = BTreeMap::from([
            (BACKUP_TAG.to_string(), self.backup_name.clone()),
            (VOLUME_TAG.to_string(), volume.name().to_string()),
        ]);

        info!(
            name = volume.name(),
            location = %location.name,
            volume_id = %volume_id,
            az = %az,
            "Snapshotting persistent volume"
        );

        let seq = self.dispatched.len();
        self.dispatched.push(snapshot.clone());

        let semaphore = self.semaphore.clone();
        let timeout = self.timeout;
        let provider = location.provider.clone();
        self.tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;

            let result = match call_guarded_with_timeout(
                &provider,
                "get_volume_info",
                timeout,
                snapshotter.get_volume_info(&volume_id, &az),
            )
            .await
            {
                Ok(info) => {
                    snapshot.spec.volume_type = info.volume_type;
                    snapshot.spec.volume_iops = info.iops;
                    call_guarded_with_timeout(
                        &provider,
                        "create_snapshot",
                        timeout,
                        snapshotter.create_snapshot(&volume_id, &az, &tags),
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            let transition = match result {
                Ok(snapshot_id) => {
                    info!(pv = %snapshot.spec.persistent_volume_name, snapshot_id = %snapshot_id, "Snapshot completed");
                    snapshot.complete(snapshot_id)
                }
                Err(e) => {
                    warn!(pv = %snapshot.spec.persistent_volume_name, error = %e, "Snapshot failed");
                    snapshot.fail()
                }
            };
            if let Err(e) = transition {
                error!(pv = %snapshot.spec.persistent_volume_name, error = %e, "Snapshot record rejected outcome");
            }
            (seq, snapshot)
        });
    }

    /// Wait for every dispatched snapshot, then close the snapshotters. A task
    /// that died without reporting leaves its record `Failed`.
    pub async fn finish(mut self) -> (Vec<VolumeSnapshot>, Vec<String>) {
        let mut results: Vec<Option<VolumeSnapshot>> = vec![None; self.dispatched.len()];
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((seq, snapshot)) => {
                    if let Some(slot) = results.get_mut(seq) {
                        *slot = Some(snapshot);
                    }
                }
                Err(e) => error!("Snapshot task failed: {}", e),
            }
        }

        for location in &self.locations {
            let Some(Some(snapshotter)) = self.snapshotters.remove(&location.name) else {
                continue;
            };
            if let Err(e) =
                call_guarded_with_timeout(&location.provider, "close", self.timeout, snapshotter.close()).await
            {
                warn!(location = %location.name, error = %e, "Failed to close volume snapshotter");
            }
        }

        let snapshots = results
            .into_iter()
            .zip(self.dispatched)
            .map(|(result, mut dispatched)| {
                result.unwrap_or_else(|| {
                    let _ = dispatched.fail();
                    dispatched
                })
            })
            .collect();
        (snapshots, self.warnings)
    }
}
