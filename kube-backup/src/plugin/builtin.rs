//! Item actions shipped with the crate.

use super::{ExecuteOutput, ItemAction, ResourceSelector};
use crate::model::{BackupSpec, GroupResource, ResourceIdentifier, ResourceItem};
use crate::utils::errors::PluginError;
use async_trait::async_trait;
use serde_json::Value;

pub const POD_ACTION: &str = "pod";
pub const PVC_ACTION: &str = "pvc";

/// Pulls in the claims a pod mounts.
pub struct PodAction;

#[async_trait]
impl ItemAction for PodAction {
    async fn applies_to(&self) -> Result<ResourceSelector, PluginError> {
        Ok(ResourceSelector::for_resources(&["pods"]))
    }

    async fn execute(
        &self,
        item: ResourceItem,
        _backup: &BackupSpec,
    ) -> Result<ExecuteOutput, PluginError> {
        let namespace = item.namespace().to_string();
        let additional_items = item
            .pointer(&["spec", "volumes"])
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|volume| {
                volume
                    .get("persistentVolumeClaim")
                    .and_then(|claim| claim.get("claimName"))
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
            })
            .map(|claim| {
                ResourceIdentifier::new(
                    GroupResource::persistent_volume_claims(),
                    namespace.clone(),
                    claim,
                )
            })
            .collect::<Vec<_>>();

        if !additional_items.is_empty() {
            tracing::debug!(
                namespace = %namespace,
                name = item.name(),
                claims = additional_items.len(),
                "Pod mounts persistent volume claims"
            );
        }
        Ok(ExecuteOutput {
            item,
            additional_items,
        })
    }
}

/// Pulls in the volume a claim is bound to.
pub struct PvcAction;

#[async_trait]
impl ItemAction for PvcAction {
    async fn applies_to(&self) -> Result<ResourceSelector, PluginError> {
        Ok(ResourceSelector::for_resources(&["persistentvolumeclaims"]))
    }

    async fn execute(
        &self,
        item: ResourceItem,
        _backup: &BackupSpec,
    ) -> Result<ExecuteOutput, PluginError> {
        let additional_items = item
            .pointer(&["spec", "volumeName"])
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(|volume| {
                vec![ResourceIdentifier::cluster_scoped(
                    GroupResource::persistent_volumes(),
                    volume,
                )]
            })
            .unwrap_or_default();
        Ok(ExecuteOutput {
            item,
            additional_items,
        })
    }
}
