//! Shared fixtures for the end-to-end backup tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kube_backup::archive::{self, ArchiveEntry, VERSION_PATH};
use kube_backup::client::ClusterDump;
use kube_backup::discovery::{ApiResource, DiscoveryClient, DiscoveryHelper};
use kube_backup::model::{BackupRequest, BackupSpec, GroupResource, ResourceIdentifier, ResourceItem};
use kube_backup::plugin::{ExecuteOutput, ItemAction, PluginRegistry, ResourceSelector, VolumeInfo, VolumeSnapshotter};
use kube_backup::utils::errors::{DiscoveryError, PluginError};
use kube_backup::{BackupError, BackupOptions, Backupper};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One resource type and the objects that exist for it.
pub struct TestResource {
    pub resource: ApiResource,
    pub items: Vec<Value>,
}

pub fn pods(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("", "v1", "pods", "Pod", true).with_short_names(&["po"]),
        items,
    }
}

pub fn pvcs(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("", "v1", "persistentvolumeclaims", "PersistentVolumeClaim", true)
            .with_short_names(&["pvc"]),
        items,
    }
}

pub fn secrets(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("", "v1", "secrets", "Secret", true),
        items,
    }
}

pub fn deployments(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("apps", "v1", "deployments", "Deployment", true)
            .with_short_names(&["deploy"]),
        items,
    }
}

pub fn ext_deployments(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("extensions", "v1", "deployments", "Deployment", true)
            .with_short_names(&["deploy"]),
        items,
    }
}

pub fn pvs(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("", "v1", "persistentvolumes", "PersistentVolume", false)
            .with_short_names(&["pv"]),
        items,
    }
}

pub fn namespaces(items: Vec<Value>) -> TestResource {
    TestResource {
        resource: ApiResource::new("", "v1", "namespaces", "Namespace", false)
            .with_short_names(&["ns"]),
        items,
    }
}

fn object(api_version: &str, kind: &str, namespace: &str, name: &str) -> Value {
    let mut metadata = serde_json::Map::new();
    if !namespace.is_empty() {
        metadata.insert("namespace".into(), json!(namespace));
    }
    metadata.insert("name".into(), json!(name));
    json!({"apiVersion": api_version, "kind": kind, "metadata": metadata})
}

pub fn new_pod(namespace: &str, name: &str) -> Value {
    object("v1", "Pod", namespace, name)
}

pub fn new_pvc(namespace: &str, name: &str) -> Value {
    object("v1", "PersistentVolumeClaim", namespace, name)
}

pub fn new_secret(namespace: &str, name: &str) -> Value {
    object("v1", "Secret", namespace, name)
}

pub fn new_deployment(namespace: &str, name: &str) -> Value {
    object("apps/v1", "Deployment", namespace, name)
}

pub fn new_ext_deployment(namespace: &str, name: &str) -> Value {
    object("extensions/v1", "Deployment", namespace, name)
}

pub fn new_pv(name: &str) -> Value {
    object("v1", "PersistentVolume", "", name)
}

pub fn new_namespace(name: &str) -> Value {
    object("v1", "Namespace", "", name)
}

pub fn with_labels(mut object: Value, labels: &[(&str, &str)]) -> Value {
    let map: serde_json::Map<String, Value> = labels.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
    object["metadata"]["labels"] = Value::Object(map);
    object
}

pub fn with_annotations(mut object: Value, annotations: &[(&str, &str)]) -> Value {
    let map: serde_json::Map<String, Value> =
        annotations.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
    object["metadata"]["annotations"] = Value::Object(map);
    object
}

pub fn terminating(mut object: Value) -> Value {
    object["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
    object
}

pub fn with_field(mut object: Value, path: &[&str], value: Value) -> Value {
    let mut current = &mut object;
    for segment in &path[..path.len() - 1] {
        if current.get(*segment).is_none() {
            current[*segment] = json!({});
        }
        current = &mut current[*segment];
    }
    current[path[path.len() - 1]] = value;
    object
}

pub fn cluster(resources: Vec<TestResource>) -> ClusterDump {
    let mut dump = ClusterDump::new();
    for test_resource in resources {
        let gr = test_resource.resource.group_resource();
        dump = dump.with_resource(test_resource.resource);
        for item in test_resource.items {
            dump = dump.with_item(&gr, item);
        }
    }
    dump
}

pub fn default_spec() -> BackupSpec {
    BackupSpec::named("backup-1")
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub fn fast_options() -> BackupOptions {
    BackupOptions {
        snapshot_timeout: Duration::from_secs(5),
        max_concurrent_snapshots: 4,
        compression_level: 1,
    }
}

pub async fn run_backup_with(
    dump: Arc<ClusterDump>,
    registry: PluginRegistry,
    options: BackupOptions,
    request: &mut BackupRequest,
) -> Result<Vec<ArchiveEntry>, BackupError> {
    let discovery = DiscoveryHelper::new(dump.clone()).await?;
    let mut backupper = Backupper::new(discovery, dump, Arc::new(registry), options);
    let outcome = backupper.backup(request, Vec::new()).await?;
    Ok(archive::read_entries(outcome.writer.as_slice())?)
}

pub async fn run_backup(
    dump: ClusterDump,
    registry: PluginRegistry,
    request: &mut BackupRequest,
) -> Result<Vec<ArchiveEntry>, BackupError> {
    run_backup_with(Arc::new(dump), registry, fast_options(), request).await
}

/// Item paths in archive order, without the version marker.
pub fn item_paths(entries: &[ArchiveEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.path != VERSION_PATH)
        .map(|e| e.path.clone())
        .collect()
}

pub fn entry_json(entries: &[ArchiveEntry], path: &str) -> Value {
    entries
        .iter()
        .find(|e| e.path == path)
        .unwrap_or_else(|| panic!("{path} missing from archive"))
        .json()
        .unwrap()
}

pub fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths
}

/// Discovery whose advertised resources can be swapped between runs.
pub struct SwitchableDiscovery {
    resources: Mutex<Vec<ApiResource>>,
}

impl SwitchableDiscovery {
    pub fn new(resources: Vec<ApiResource>) -> Self {
        Self {
            resources: Mutex::new(resources),
        }
    }

    pub fn set(&self, resources: Vec<ApiResource>) {
        *self.resources.lock().unwrap() = resources;
    }
}

#[async_trait]
impl DiscoveryClient for SwitchableDiscovery {
    async fn server_resources(&self) -> Result<Vec<ApiResource>, DiscoveryError> {
        Ok(self.resources.lock().unwrap().clone())
    }
}

type ExecuteFn = dyn Fn(ResourceItem) -> Result<ExecuteOutput, PluginError> + Send + Sync;

/// Item action whose selector and behaviour are supplied by the test.
/// Records every item it ran for.
pub struct PluggableAction {
    selector: Result<ResourceSelector, PluginError>,
    execute: Option<Box<ExecuteFn>>,
    pub executions: Arc<Mutex<Vec<ResourceIdentifier>>>,
}

impl PluggableAction {
    pub fn new(selector: ResourceSelector) -> Self {
        Self {
            selector: Ok(selector),
            execute: None,
            executions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_applies_to(message: &str) -> Self {
        Self {
            selector: Err(PluginError::failed("pluggable", message)),
            execute: None,
            executions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(ResourceItem) -> Result<ExecuteOutput, PluginError> + Send + Sync + 'static,
    {
        self.execute = Some(Box::new(f));
        self
    }

    /// Shared handle to the recorded executions.
    pub fn recorder(&self) -> Arc<Mutex<Vec<ResourceIdentifier>>> {
        self.executions.clone()
    }
}

#[async_trait]
impl ItemAction for PluggableAction {
    async fn applies_to(&self) -> Result<ResourceSelector, PluginError> {
        self.selector.clone()
    }

    async fn execute(
        &self,
        item: ResourceItem,
        _backup: &BackupSpec,
    ) -> Result<ExecuteOutput, PluginError> {
        self.executions.lock().unwrap().push(item.identifier());
        match &self.execute {
            Some(f) => f(item),
            None => Ok(ExecuteOutput::unchanged(item)),
        }
    }
}

pub fn recorded(recorder: &Arc<Mutex<Vec<ResourceIdentifier>>>) -> Vec<String> {
    recorder
        .lock()
        .unwrap()
        .iter()
        .map(|id| id.to_string())
        .collect()
}

#[derive(Clone)]
pub struct FakeVolume {
    pub volume_id: String,
    pub volume_type: String,
    pub iops: Option<i64>,
    pub fail: bool,
}

/// Snapshot backend keyed by persistent volume name.
#[derive(Clone, Default)]
pub struct FakeVolumeSnapshotter {
    volumes: HashMap<String, FakeVolume>,
    panic_on_create: bool,
    fail_init: bool,
    create_delay: Option<Duration>,
    pub inits: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub tags: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

impl FakeVolumeSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, pv: &str, volume_id: &str, volume_type: &str, iops: Option<i64>, fail: bool) -> Self {
        self.volumes.insert(
            pv.to_string(),
            FakeVolume {
                volume_id: volume_id.to_string(),
                volume_type: volume_type.to_string(),
                iops,
                fail,
            },
        );
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_create = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    fn by_volume_id(&self, volume_id: &str) -> Option<&FakeVolume> {
        self.volumes.values().find(|v| v.volume_id == volume_id)
    }

    /// Register this fake under `provider`; every instantiation shares state.
    pub fn register(self, registry: &mut PluginRegistry, provider: &str) {
        registry.register_volume_snapshotter(provider, move || Box::new(self.clone()));
    }
}

#[async_trait]
impl VolumeSnapshotter for FakeVolumeSnapshotter {
    async fn init(&mut self, _config: &BTreeMap<String, String>) -> Result<(), PluginError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(PluginError::failed("fake", "missing credentials"));
        }
        Ok(())
    }

    async fn get_volume_id(&self, volume: &ResourceItem) -> Result<Option<String>, PluginError> {
        Ok(self.volumes.get(volume.name()).map(|v| v.volume_id.clone()))
    }

    async fn get_volume_info(&self, volume_id: &str, _az: &str) -> Result<VolumeInfo, PluginError> {
        let volume = self
            .by_volume_id(volume_id)
            .ok_or_else(|| PluginError::failed("fake", format!("unknown volume {volume_id}")))?;
        Ok(VolumeInfo {
            volume_type: volume.volume_type.clone(),
            iops: volume.iops,
        })
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        _az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String, PluginError> {
        if self.panic_on_create {
            panic!("snapshot backend crashed");
        }
        self.tags.lock().unwrap().push(tags.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let volume = self
            .by_volume_id(volume_id)
            .ok_or_else(|| PluginError::failed("fake", format!("unknown volume {volume_id}")))?;
        if volume.fail {
            return Err(PluginError::failed("fake", "error calling CreateSnapshot"));
        }
        Ok(format!("{volume_id}-snapshot"))
    }

    async fn close(&self) -> Result<(), PluginError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn gr(group: &str, resource: &str) -> GroupResource {
    GroupResource::new(group, resource)
}
