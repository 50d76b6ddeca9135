//! Extension points: item actions and volume snapshotters.
//!
//! Plugins are looked up by name in a `PluginRegistry`. A plugin may live in
//! this process or behind an RPC transport; callers cannot tell the difference.

pub mod builtin;
pub mod guard;
pub mod rpc;
pub mod ws;

use crate::model::{BackupSpec, ResourceIdentifier, ResourceItem};
use crate::utils::errors::PluginError;
use async_trait::async_trait;
use rpc::{RemoteItemAction, RemoteVolumeSnapshotter, RpcTransport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The items an action wants to see. An all-default selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSelector {
    pub included_namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,
    pub included_resources: Vec<String>,
    pub excluded_resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
}

impl ResourceSelector {
    pub fn for_resources(resources: &[&str]) -> Self {
        Self {
            included_resources: resources.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_namespaces(mut self, namespaces: &[&str]) -> Self {
        self.included_namespaces = namespaces.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_excluded_resources(mut self, resources: &[&str]) -> Self {
        self.excluded_resources = resources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

/// Result of running an item action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutput {
    pub item: ResourceItem,
    #[serde(default)]
    pub additional_items: Vec<ResourceIdentifier>,
}

impl ExecuteOutput {
    /// The item untouched, nothing else requested.
    pub fn unchanged(item: ResourceItem) -> Self {
        Self {
            item,
            additional_items: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ItemAction: Send + Sync {
    async fn applies_to(&self) -> Result<ResourceSelector, PluginError>;

    async fn execute(
        &self,
        item: ResourceItem,
        backup: &BackupSpec,
    ) -> Result<ExecuteOutput, PluginError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub volume_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
}

/// Block-level snapshot backend for one provider.
#[async_trait]
pub trait VolumeSnapshotter: Send + Sync {
    async fn init(&mut self, config: &BTreeMap<String, String>) -> Result<(), PluginError>;

    /// Provider-native volume ID, or `None` when the volume is not one of ours.
    async fn get_volume_id(&self, volume: &ResourceItem) -> Result<Option<String>, PluginError>;

    async fn get_volume_info(&self, volume_id: &str, az: &str)
        -> Result<VolumeInfo, PluginError>;

    /// Returns the provider-assigned snapshot ID.
    async fn create_snapshot(
        &self,
        volume_id: &str,
        az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String, PluginError>;

    /// Release whatever the snapshotter holds. Called once the run is done with it.
    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Builds a fresh, uninitialised snapshotter.
pub type SnapshotterFactory = Arc<dyn Fn() -> Box<dyn VolumeSnapshotter> + Send + Sync>;

#[derive(Clone)]
pub struct NamedItemAction {
    pub name: String,
    pub action: Arc<dyn ItemAction>,
}

/// Registered plugins by name. Item actions keep registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    item_actions: Vec<NamedItemAction>,
    snapshotters: HashMap<String, SnapshotterFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the pod and pvc actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_item_action(builtin::POD_ACTION, Arc::new(builtin::PodAction));
        registry.register_item_action(builtin::PVC_ACTION, Arc::new(builtin::PvcAction));
        registry
    }

    /// Registering an existing name replaces it in place.
    pub fn register_item_action(&mut self, name: impl Into<String>, action: Arc<dyn ItemAction>) {
        let name = name.into();
        match self.item_actions.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.action = action,
            None => self.item_actions.push(NamedItemAction { name, action }),
        }
    }

    pub fn register_volume_snapshotter<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn VolumeSnapshotter> + Send + Sync + 'static,
    {
        self.snapshotters.insert(name.into(), Arc::new(factory));
    }

    pub fn register_remote_item_action(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
    ) {
        let name = name.into();
        let action = RemoteItemAction::new(name.clone(), transport);
        self.register_item_action(name, Arc::new(action));
    }

    /// Each instantiation gets its own remote instance.
    pub fn register_remote_volume_snapshotter(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
    ) {
        let name = name.into();
        let plugin = name.clone();
        self.register_volume_snapshotter(name, move || {
            Box::new(RemoteVolumeSnapshotter::new(plugin.clone(), transport.clone()))
        });
    }

    pub fn item_actions(&self) -> &[NamedItemAction] {
        &self.item_actions
    }

    pub fn item_action(&self, name: &str) -> Option<Arc<dyn ItemAction>> {
        self.item_actions
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.action.clone())
    }

    pub fn has_volume_snapshotter(&self, name: &str) -> bool {
        self.snapshotters.contains_key(name)
    }

    pub fn new_volume_snapshotter(&self, name: &str) -> Option<Box<dyn VolumeSnapshotter>> {
        self.snapshotters.get(name).map(|factory| factory())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut snapshotters: Vec<&String> = self.snapshotters.keys().collect();
        snapshotters.sort();
        f.debug_struct("PluginRegistry")
            .field(
                "item_actions",
                &self.item_actions.iter().map(|a| &a.name).collect::<Vec<_>>(),
            )
            .field("snapshotters", &snapshotters)
            .finish()
    }
}
