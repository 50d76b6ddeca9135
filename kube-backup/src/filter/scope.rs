//! Eligibility of resource types and items for one backup run.

use super::{resource_includes_excludes, IncludesExcludes, LabelSelector};
use crate::discovery::{ApiResource, DiscoveryHelper};
use crate::model::{BackupSpec, GroupResource, ResourceIdentifier, ResourceItem};
use crate::utils::errors::SelectorError;
use std::collections::BTreeMap;

/// Filters derived from a `BackupSpec` against the current discovery catalog.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    resources: IncludesExcludes,
    namespaces: IncludesExcludes,
    label_selector: LabelSelector,
    include_cluster_resources: Option<bool>,
}

impl ScopeFilter {
    /// Fails only on a malformed label selector.
    pub fn new(helper: &DiscoveryHelper, spec: &BackupSpec) -> Result<Self, SelectorError> {
        let label_selector = match spec.label_selector.as_deref() {
            Some(selector) => LabelSelector::parse(selector)?,
            None => LabelSelector::default(),
        };

        Ok(Self {
            resources: resource_includes_excludes(
                helper,
                &spec.included_resources,
                &spec.excluded_resources,
            ),
            namespaces: IncludesExcludes::new(
                spec.included_namespaces.clone(),
                spec.excluded_namespaces.clone(),
            ),
            label_selector,
            include_cluster_resources: spec.include_cluster_resources,
        })
    }

    /// Resource names from the spec that matched nothing in discovery.
    pub fn unresolved_resources(&self) -> &[String] {
        self.resources.unresolved()
    }

    pub fn resource_included(&self, gr: &GroupResource) -> bool {
        self.resources.should_include(&gr.to_string())
    }

    pub fn namespace_included(&self, namespace: &str) -> bool {
        self.namespaces.should_include(namespace)
    }

    pub fn labels_match(&self, labels: &BTreeMap<String, String>) -> bool {
        self.label_selector.matches(labels)
    }

    /// Unset backs up cluster-scoped types only when no namespace subset was asked for.
    fn cluster_resources_included(&self) -> bool {
        self.include_cluster_resources
            .unwrap_or_else(|| self.namespaces.includes_all())
    }

    /// Type-level gate for direct enumeration.
    pub fn resource_eligible(&self, resource: &ApiResource) -> bool {
        let gr = resource.group_resource();
        if !self.resource_included(&gr) {
            return false;
        }
        if resource.namespaced {
            return true;
        }
        // Namespace objects follow the namespace filter instead, unless
        // cluster resources were explicitly turned off.
        if gr == GroupResource::namespaces() && self.include_cluster_resources.is_none() {
            return true;
        }
        self.cluster_resources_included()
    }

    /// Namespaces to list a namespaced type in; `None` means all of them.
    pub fn namespaces_to_list(&self) -> Vec<Option<String>> {
        if self.namespaces.includes_all() {
            vec![None]
        } else {
            self.namespaces
                .includes()
                .iter()
                .map(|ns| Some(ns.clone()))
                .collect()
        }
    }

    /// Full gate for a directly enumerated item.
    pub fn eligible(&self, resource: &ApiResource, item: &ResourceItem) -> bool {
        if !self.resource_eligible(resource) || item.is_terminating() {
            return false;
        }
        let namespace_ok = if resource.namespaced {
            self.namespace_included(item.namespace())
        } else if resource.group_resource() == GroupResource::namespaces() {
            self.namespace_included(item.name())
        } else {
            true
        };
        namespace_ok && self.labels_match(&item.labels())
    }

    /// Gate for an item requested by an action, checked before it is fetched.
    /// Labels and the unset cluster-resource rule do not apply here.
    pub fn additional_item_eligible(&self, resource: &ApiResource, id: &ResourceIdentifier) -> bool {
        if !self.resource_included(&resource.group_resource()) {
            return false;
        }
        if resource.namespaced {
            self.namespace_included(&id.namespace)
        } else {
            self.include_cluster_resources != Some(false)
        }
    }
}
