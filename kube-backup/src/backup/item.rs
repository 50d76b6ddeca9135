//! Per-item processing: item actions, additional items, snapshots, archive.

use super::snapshot::SnapshotOrchestrator;
use crate::archive::ArchiveWriter;
use crate::client::DynamicClient;
use crate::cohabitation::CohabitationResolver;
use crate::discovery::{ApiResource, DiscoveryHelper};
use crate::filter::{resource_includes_excludes, IncludesExcludes, LabelSelector, ScopeFilter};
use crate::model::{BackupSpec, GroupResource, ResourceIdentifier, ResourceItem};
use crate::plugin::guard::call_guarded;
use crate::plugin::{ItemAction, NamedItemAction};
use crate::utils::errors::{BackupError, Result};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An item action with its selector resolved against the discovery catalog.
pub struct ResolvedAction {
    pub name: String,
    action: Arc<dyn ItemAction>,
    resources: IncludesExcludes,
    /// Named resources were requested but none exist in this cluster.
    resources_unresolved: bool,
    namespaces: IncludesExcludes,
    label_selector: Option<LabelSelector>,
}

impl ResolvedAction {
    /// Whether the action runs for `item`, judged on the item as enumerated.
    pub fn applies_to(&self, item: &ResourceItem) -> bool {
        if self.resources_unresolved || !self.resources.should_include(&item.group_resource.to_string()) {
            return false;
        }
        // Cluster-scoped items ignore the namespace selector.
        let namespace = item.namespace();
        if !namespace.is_empty() && !self.namespaces.should_include(namespace) {
            return false;
        }
        match &self.label_selector {
            Some(selector) => selector.matches(&item.labels()),
            None => true,
        }
    }
}

/// Ask every registered action what it applies to. Any failure aborts the run.
/// Selector names that resolve to nothing are reported into `warnings`.
pub async fn resolve_actions(
    helper: &DiscoveryHelper,
    actions: &[NamedItemAction],
    warnings: &mut Vec<String>,
) -> Result<Vec<ResolvedAction>> {
    let mut resolved = Vec::with_capacity(actions.len());
    for named in actions {
        let selector = call_guarded(&named.name, "applies_to", named.action.applies_to())
            .await
            .map_err(|source| BackupError::ActionConfig {
                plugin: named.name.clone(),
                source,
            })?;

        let label_selector = selector
            .label_selector
            .as_deref()
            .map(LabelSelector::parse)
            .transpose()?;
        let resources = resource_includes_excludes(
            helper,
            &selector.included_resources,
            &selector.excluded_resources,
        );
        for name in resources.unresolved() {
            warnings.push(format!(
                "item action {}: unknown resource {:?} in selector ignored",
                named.name, name
            ));
        }
        let resources_unresolved =
            !selector.included_resources.is_empty() && resources.includes().is_empty();
        if resources_unresolved {
            warn!(plugin = %named.name, "Item action applies to no resource known to this cluster");
            warnings.push(format!(
                "item action {} applies to no resource known to this cluster",
                named.name
            ));
        }

        resolved.push(ResolvedAction {
            name: named.name.clone(),
            action: named.action.clone(),
            resources,
            resources_unresolved,
            namespaces: IncludesExcludes::new(
                selector.included_namespaces,
                selector.excluded_namespaces,
            ),
            label_selector,
        });
    }
    Ok(resolved)
}

/// Items already processed in this run.
#[derive(Debug, Default)]
pub struct BackedUpItems {
    items: HashSet<ResourceIdentifier>,
}

impl BackedUpItems {
    pub fn contains(&self, id: &ResourceIdentifier) -> bool {
        self.items.contains(id)
    }

    /// Returns false when `id` was already present.
    pub fn insert(&mut self, id: ResourceIdentifier) -> bool {
        self.items.insert(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything one run needs while walking items. Dropped at the end of the run.
pub struct ItemBackupper<'a, W: Write> {
    pub(super) spec: &'a BackupSpec,
    pub(super) discovery: &'a DiscoveryHelper,
    pub(super) client: Arc<dyn DynamicClient>,
    pub(super) filter: ScopeFilter,
    pub(super) cohabitation: CohabitationResolver,
    pub(super) actions: Vec<ResolvedAction>,
    pub(super) snapshots: SnapshotOrchestrator,
    pub(super) archive: ArchiveWriter<W>,
    pub(super) backed_up: BackedUpItems,
    pub(super) written: Vec<ResourceIdentifier>,
    pub(super) errors: Vec<String>,
}

impl<'a, W: Write + Send> ItemBackupper<'a, W> {
    /// Enumerate and back up every eligible item of one resource type.
    pub async fn backup_resource(&mut self, resource: &'a ApiResource) -> Result<()> {
        let gr = resource.group_resource();
        if self.cohabitation.should_skip(&gr) {
            info!(resource = %gr, "Skipping resource, served by its preferred API group");
            return Ok(());
        }
        if !self.filter.resource_eligible(resource) {
            debug!(resource = %gr, "Skipping resource excluded by backup scope");
            return Ok(());
        }

        let namespaces = if resource.namespaced {
            self.filter.namespaces_to_list()
        } else {
            vec![None]
        };

        for namespace in namespaces {
            let objects = self
                .client
                .list(resource, namespace.as_deref())
                .await
                .map_err(|source| BackupError::List {
                    resource: gr.to_string(),
                    source,
                })?;
            debug!(resource = %gr, namespace = namespace.as_deref().unwrap_or("*"), count = objects.len(), "Listed items");

            for object in objects {
                let Some(item) = ResourceItem::from_value(gr.clone(), object) else {
                    warn!(resource = %gr, "Ignoring listed entry that is not an object");
                    continue;
                };
                if !self.filter.eligible(resource, &item) {
                    debug!(resource = %gr, namespace = item.namespace(), name = item.name(), "Skipping item excluded by backup scope");
                    continue;
                }

                match self.backup_item(resource, item).await {
                    Ok(()) => {}
                    Err(e) if !e.is_fatal() => {
                        warn!(resource = %gr, error = %e, "Item not backed up");
                        self.errors.push(e.to_string());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Run actions on one item, back up what they request, then archive it.
    pub fn backup_item(
        &mut self,
        resource: &'a ApiResource,
        item: ResourceItem,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Path and action matching use the identity as enumerated.
            let id = item.identifier();
            if !self.backed_up.insert(id.clone()) {
                debug!(item = %id, "Item already backed up");
                return Ok(());
            }
            info!(resource = %id.group_resource, namespace = %id.namespace, name = %id.name, "Backing up item");

            let matching: Vec<(String, Arc<dyn ItemAction>)> = self
                .actions
                .iter()
                .filter(|a| a.applies_to(&item))
                .map(|a| (a.name.clone(), a.action.clone()))
                .collect();

            let mut item = item;
            for (plugin, action) in matching {
                info!(plugin = %plugin, item = %id, "Executing item action");
                let output = call_guarded(&plugin, "execute", action.execute(item, self.spec))
                    .await
                    .map_err(|source| BackupError::ActionExecute {
                        plugin: plugin.clone(),
                        item: id.to_string(),
                        source,
                    })?;
                item = output.item;

                for additional in output.additional_items {
                    info!(plugin = %plugin, item = %id, additional = %additional, "Backing up additional item");
                    self.backup_additional_item(additional).await?;
                }
            }

            if id.group_resource == GroupResource::persistent_volumes() {
                self.snapshots.take_snapshot(&item).await;
            }

            let path = self.archive.write_item(&id, &item)?;
            debug!(item = %id, path = %path, "Item written to archive");
            self.written.push(id);
            Ok(())
        })
    }

    async fn backup_additional_item(&mut self, requested: ResourceIdentifier) -> Result<()> {
        let not_backed_up = |reason: String| BackupError::AdditionalItem {
            item: requested.to_string(),
            reason,
        };

        let gr = self.cohabitation.resolve(&requested.group_resource);
        let discovery = self.discovery;
        let resource = discovery
            .api_resource(&gr)
            .or_else(|| discovery.resource_for(&gr.to_string()))
            .ok_or_else(|| not_backed_up("resource type is not served by the cluster".to_string()))?;

        let namespace = if resource.namespaced {
            requested.namespace.clone()
        } else {
            String::new()
        };
        let id = ResourceIdentifier::new(resource.group_resource(), namespace, requested.name.clone());

        if self.backed_up.contains(&id) {
            debug!(item = %id, "Additional item already backed up");
            return Ok(());
        }
        if !self.filter.additional_item_eligible(resource, &id) {
            debug!(item = %id, "Additional item excluded by backup scope");
            return Ok(());
        }

        let object = self
            .client
            .get(resource, &id.namespace, &id.name)
            .await
            .map_err(|e| not_backed_up(e.to_string()))?
            .ok_or_else(|| not_backed_up("not found".to_string()))?;
        let item = ResourceItem::from_value(id.group_resource.clone(), object)
            .ok_or_else(|| not_backed_up("not an object".to_string()))?;
        if item.is_terminating() {
            debug!(item = %id, "Additional item is terminating, skipping");
            return Ok(());
        }

        self.backup_item(resource, item).await
    }
}
