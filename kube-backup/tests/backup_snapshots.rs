//! Persistent volume snapshots taken during a backup.

mod common;

use common::*;
use kube_backup::backup::snapshot::{
    BACKUP_TAG, LEGACY_ZONE_LABEL, SNAPSHOT_LOCATION_ANNOTATION, VOLUME_TAG, ZONE_LABEL,
};
use kube_backup::model::{BackupRequest, BackupSpec, SnapshotLocation, SnapshotPhase, VolumeSnapshot};
use kube_backup::plugin::rpc::{LocalTransport, PluginServer};
use kube_backup::plugin::PluginRegistry;
use kube_backup::BackupOptions;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn default_location() -> Vec<SnapshotLocation> {
    vec![SnapshotLocation::new("default", "fake")]
}

fn registry_with(snapshotter: FakeVolumeSnapshotter, provider: &str) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    snapshotter.register(&mut registry, provider);
    registry
}

async fn snapshots_for(
    volumes: Vec<serde_json::Value>,
    registry: PluginRegistry,
    spec: BackupSpec,
    locations: Vec<SnapshotLocation>,
    options: BackupOptions,
) -> (Vec<String>, Vec<VolumeSnapshot>) {
    let dump = Arc::new(cluster(vec![pvs(volumes)]));
    let mut request = BackupRequest::new(spec).with_snapshot_locations(locations);
    let entries = run_backup_with(dump, registry, options, &mut request)
        .await
        .unwrap();
    (item_paths(&entries), request.volume_snapshots)
}

async fn snapshots(volumes: Vec<serde_json::Value>, registry: PluginRegistry) -> Vec<VolumeSnapshot> {
    snapshots_for(volumes, registry, default_spec(), default_location(), fast_options())
        .await
        .1
}

#[tokio::test]
async fn test_snapshot_without_zone() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", Some(1000), false);
    let records = snapshots(vec![new_pv("pv-1")], registry_with(fake, "fake")).await;

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.spec.backup_name, "backup-1");
    assert_eq!(record.spec.location, "default");
    assert_eq!(record.spec.persistent_volume_name, "pv-1");
    assert_eq!(record.spec.provider_volume_id, "vol-1");
    assert_eq!(record.spec.volume_az, "");
    assert_eq!(record.spec.volume_type, "gp2");
    assert_eq!(record.spec.volume_iops, Some(1000));
    assert_eq!(record.status.phase, SnapshotPhase::Completed);
    assert_eq!(record.status.provider_snapshot_id.as_deref(), Some("vol-1-snapshot"));
}

#[tokio::test]
async fn test_snapshot_with_zone_label() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "io1", None, false);
    let pv = with_labels(new_pv("pv-1"), &[(ZONE_LABEL, "us-east-1c")]);
    let records = snapshots(vec![pv], registry_with(fake, "fake")).await;

    assert_eq!(records[0].spec.volume_az, "us-east-1c");
    assert_eq!(records[0].spec.volume_iops, None);
    assert_eq!(records[0].status.phase, SnapshotPhase::Completed);
}

#[tokio::test]
async fn test_snapshot_with_legacy_zone_label() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let pv = with_labels(new_pv("pv-1"), &[(LEGACY_ZONE_LABEL, "us-east-1a")]);
    let records = snapshots(vec![pv], registry_with(fake, "fake")).await;

    assert_eq!(records[0].spec.volume_az, "us-east-1a");
}

#[tokio::test]
async fn test_create_snapshot_error_marks_failed() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, true);
    let (paths, records) = snapshots_for(
        vec![new_pv("pv-1")],
        registry_with(fake, "fake"),
        default_spec(),
        default_location(),
        fast_options(),
    )
    .await;

    assert_eq!(paths, vec!["resources/persistentvolumes/cluster/pv-1.json"]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status.phase, SnapshotPhase::Failed);
    assert_eq!(records[0].status.provider_snapshot_id, None);
}

#[tokio::test]
async fn test_snapshot_volumes_false_takes_no_snapshots() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let spec = BackupSpec {
        snapshot_volumes: Some(false),
        ..default_spec()
    };
    let (paths, records) = snapshots_for(
        vec![new_pv("pv-1")],
        registry_with(fake.clone(), "fake"),
        spec,
        default_location(),
        fast_options(),
    )
    .await;

    assert_eq!(paths.len(), 1);
    assert!(records.is_empty());
    assert_eq!(fake.inits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_snapshot_locations_takes_no_snapshots() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let (paths, records) = snapshots_for(
        vec![new_pv("pv-1")],
        registry_with(fake, "fake"),
        default_spec(),
        Vec::new(),
        fast_options(),
    )
    .await;

    assert_eq!(paths.len(), 1);
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_no_registered_snapshotter_takes_no_snapshots() {
    let records = snapshots(vec![new_pv("pv-1")], PluginRegistry::new()).await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_unregistered_provider_and_unknown_resource_are_warned() {
    let spec = BackupSpec {
        included_resources: strings(&["persistentvolumes", "widgets"]),
        ..default_spec()
    };
    let dump = Arc::new(cluster(vec![pvs(vec![new_pv("pv-1")])]));
    let mut request = BackupRequest::new(spec)
        .with_snapshot_locations(vec![SnapshotLocation::new("default", "not-registered")]);
    run_backup_with(dump, PluginRegistry::new(), fast_options(), &mut request)
        .await
        .unwrap();

    assert!(request.volume_snapshots.is_empty());
    assert!(request.errors.is_empty());
    assert_eq!(request.warnings.len(), 2, "warnings: {:?}", request.warnings);
    assert!(request.warnings.iter().any(|w| w.contains("widgets")));
    assert!(request.warnings.iter().any(|w| w.contains("not-registered")));
}

#[tokio::test]
async fn test_snapshotter_init_failure_is_warned() {
    let fake = FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "vol-1", "gp2", None, false)
        .failing_init();
    let closes = fake.closes.clone();
    let dump = Arc::new(cluster(vec![pvs(vec![new_pv("pv-1"), new_pv("pv-2")])]));
    let mut request = BackupRequest::new(default_spec()).with_snapshot_locations(default_location());
    run_backup_with(dump, registry_with(fake, "fake"), fast_options(), &mut request)
        .await
        .unwrap();

    assert!(request.volume_snapshots.is_empty());
    // The failure is cached, so it is reported once for the location.
    assert_eq!(request.warnings.len(), 1, "warnings: {:?}", request.warnings);
    assert!(request.warnings[0].contains("missing credentials"));
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_pinned_location_is_warned() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let pv = with_annotations(new_pv("pv-1"), &[(SNAPSHOT_LOCATION_ANNOTATION, "loc-missing")]);
    let dump = Arc::new(cluster(vec![pvs(vec![pv])]));
    let mut request = BackupRequest::new(default_spec()).with_snapshot_locations(default_location());
    run_backup_with(dump, registry_with(fake, "fake"), fast_options(), &mut request)
        .await
        .unwrap();

    assert!(request.volume_snapshots.is_empty());
    assert_eq!(request.warnings.len(), 1, "warnings: {:?}", request.warnings);
    assert!(request.warnings[0].contains("loc-missing"));
}

#[tokio::test]
async fn test_unsupported_volume_is_skipped() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let records = snapshots(
        vec![new_pv("pv-1"), new_pv("pv-nfs")],
        registry_with(fake, "fake"),
    )
    .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].spec.persistent_volume_name, "pv-1");
}

#[tokio::test]
async fn test_multiple_locations_first_claiming_wins() {
    let mut registry = PluginRegistry::new();
    FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "aws-1", "gp2", None, false)
        .register(&mut registry, "aws");
    FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "gcp-1", "pd-ssd", None, false)
        .with_volume("pv-2", "gcp-2", "pd-ssd", None, false)
        .register(&mut registry, "gcp");
    let locations = vec![
        SnapshotLocation::new("loc-aws", "aws"),
        SnapshotLocation::new("loc-gcp", "gcp"),
    ];

    let (_, records) = snapshots_for(
        vec![new_pv("pv-1"), new_pv("pv-2")],
        registry,
        default_spec(),
        locations,
        fast_options(),
    )
    .await;

    let summary: Vec<(&str, &str, &str)> = records
        .iter()
        .map(|r| {
            (
                r.spec.persistent_volume_name.as_str(),
                r.spec.location.as_str(),
                r.spec.provider_volume_id.as_str(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![("pv-1", "loc-aws", "aws-1"), ("pv-2", "loc-gcp", "gcp-2")]
    );
}

#[tokio::test]
async fn test_pinned_location_annotation() {
    let mut registry = PluginRegistry::new();
    FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "aws-1", "gp2", None, false)
        .register(&mut registry, "aws");
    FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "gcp-1", "pd-ssd", None, false)
        .register(&mut registry, "gcp");
    let locations = vec![
        SnapshotLocation::new("loc-aws", "aws"),
        SnapshotLocation::new("loc-gcp", "gcp"),
    ];
    let pv = with_annotations(new_pv("pv-1"), &[(SNAPSHOT_LOCATION_ANNOTATION, "loc-gcp")]);

    let (_, records) = snapshots_for(vec![pv], registry, default_spec(), locations, fast_options()).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].spec.location, "loc-gcp");
    assert_eq!(records[0].spec.provider_volume_id, "gcp-1");
}

#[tokio::test]
async fn test_snapshotter_panic_marks_failed() {
    let fake = FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "vol-1", "gp2", None, false)
        .panicking();
    let (paths, records) = snapshots_for(
        vec![new_pv("pv-1"), new_pv("pv-2")],
        registry_with(fake, "fake"),
        default_spec(),
        default_location(),
        fast_options(),
    )
    .await;

    assert_eq!(paths.len(), 2);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status.phase, SnapshotPhase::Failed);
}

#[tokio::test]
async fn test_slow_snapshot_times_out() {
    let fake = FakeVolumeSnapshotter::new()
        .with_volume("pv-1", "vol-1", "gp2", None, false)
        .with_create_delay(Duration::from_secs(2));
    let options = BackupOptions {
        snapshot_timeout: Duration::from_millis(50),
        ..fast_options()
    };
    let (_, records) = snapshots_for(
        vec![new_pv("pv-1")],
        registry_with(fake, "fake"),
        default_spec(),
        default_location(),
        options,
    )
    .await;

    assert_eq!(records[0].status.phase, SnapshotPhase::Failed);
}

#[tokio::test]
async fn test_snapshotter_initialized_once_per_location() {
    let mut fake = FakeVolumeSnapshotter::new();
    for i in 1..=3 {
        fake = fake.with_volume(&format!("pv-{i}"), &format!("vol-{i}"), "gp2", None, false);
    }
    let inits = fake.inits.clone();
    let closes = fake.closes.clone();
    let mut location = SnapshotLocation::new("default", "fake");
    location.config = BTreeMap::from([("region".to_string(), "us-east-1".to_string())]);

    let (_, records) = snapshots_for(
        vec![new_pv("pv-1"), new_pv("pv-2"), new_pv("pv-3")],
        registry_with(fake, "fake"),
        default_spec(),
        vec![location],
        fast_options(),
    )
    .await;

    assert_eq!(records.len(), 3);
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_snapshots_are_bounded() {
    let mut fake = FakeVolumeSnapshotter::new().with_create_delay(Duration::from_millis(50));
    let mut volumes = Vec::new();
    for i in 1..=6 {
        fake = fake.with_volume(&format!("pv-{i}"), &format!("vol-{i}"), "gp2", None, false);
        volumes.push(new_pv(&format!("pv-{i}")));
    }
    let max_in_flight = fake.max_in_flight.clone();
    let options = BackupOptions {
        max_concurrent_snapshots: 2,
        ..fast_options()
    };

    let (_, records) = snapshots_for(
        volumes,
        registry_with(fake, "fake"),
        default_spec(),
        default_location(),
        options,
    )
    .await;

    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.status.phase == SnapshotPhase::Completed));
    let peak = max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {peak}");
    // Records come back in dispatch order.
    let names: Vec<&str> = records
        .iter()
        .map(|r| r.spec.persistent_volume_name.as_str())
        .collect();
    assert_eq!(names, vec!["pv-1", "pv-2", "pv-3", "pv-4", "pv-5", "pv-6"]);
}

#[tokio::test]
async fn test_snapshot_tags() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let tags = fake.tags.clone();
    snapshots(vec![new_pv("pv-1")], registry_with(fake, "fake")).await;

    let tags = tags.lock().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].get(BACKUP_TAG).map(String::as_str), Some("backup-1"));
    assert_eq!(tags[0].get(VOLUME_TAG).map(String::as_str), Some("pv-1"));
}

#[tokio::test]
async fn test_volume_reached_through_additional_items_is_snapshotted() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", None, false);
    let mut registry = PluginRegistry::with_builtins();
    fake.register(&mut registry, "fake");

    let pod = with_field(
        new_pod("ns-1", "pod-1"),
        &["spec", "volumes"],
        json!([{"name": "data", "persistentVolumeClaim": {"claimName": "pvc-1"}}]),
    );
    let pvc = with_field(new_pvc("ns-1", "pvc-1"), &["spec", "volumeName"], json!("pv-1"));
    let dump = Arc::new(cluster(vec![
        pods(vec![pod]),
        pvcs(vec![pvc]),
        pvs(vec![new_pv("pv-1")]),
    ]));
    let spec = BackupSpec {
        included_namespaces: strings(&["ns-1"]),
        ..default_spec()
    };

    let mut request = BackupRequest::new(spec).with_snapshot_locations(default_location());
    run_backup_with(dump, registry, fast_options(), &mut request)
        .await
        .unwrap();

    assert_eq!(request.volume_snapshots.len(), 1);
    assert_eq!(request.volume_snapshots[0].spec.persistent_volume_name, "pv-1");
    assert_eq!(request.volume_snapshots[0].status.phase, SnapshotPhase::Completed);
}

#[tokio::test]
async fn test_remote_snapshotter_over_local_transport() {
    let fake = FakeVolumeSnapshotter::new().with_volume("pv-1", "vol-1", "gp2", Some(300), false);
    let inits = fake.inits.clone();
    let closes = fake.closes.clone();
    let server = Arc::new(PluginServer::new(Arc::new(registry_with(fake, "remote-fake"))));

    let mut registry = PluginRegistry::new();
    registry.register_remote_volume_snapshotter("remote-fake", Arc::new(LocalTransport::new(server.clone())));

    let records = snapshots_for(
        vec![new_pv("pv-1")],
        registry,
        default_spec(),
        vec![SnapshotLocation::new("default", "remote-fake")],
        fast_options(),
    )
    .await
    .1;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].spec.volume_iops, Some(300));
    assert_eq!(records[0].status.provider_snapshot_id.as_deref(), Some("vol-1-snapshot"));
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(server.instance_count(), 0);
}
