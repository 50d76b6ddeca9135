//! Resource discovery index.
//!
//! Builds a catalog of the resource types a cluster advertises and answers
//! name lookups (plural, singular, kind, short name, `resource.group`) plus the
//! priority order resources are backed up in.

use crate::model::GroupResource;
use crate::utils::errors::DiscoveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One advertised resource type at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub singular_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
}

impl ApiResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            name: name.into(),
            kind: kind.into(),
            namespaced,
            short_names: Vec::new(),
            singular_name: String::new(),
            verbs: Vec::new(),
        }
    }

    pub fn with_short_names(mut self, short_names: &[&str]) -> Self {
        self.short_names = short_names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
        self.verbs = verbs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.name.clone())
    }

    /// `v1` for the core group, `group/version` otherwise.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }

    /// Types we cannot both list and later recreate are not worth archiving.
    fn supports_backup(&self) -> bool {
        self.verbs.is_empty()
            || (self.verbs.iter().any(|v| v == "list") && self.verbs.iter().any(|v| v == "create"))
    }

    fn lookup_names(&self) -> Vec<String> {
        let mut names = vec![self.name.to_lowercase()];
        if !self.singular_name.is_empty() {
            names.push(self.singular_name.to_lowercase());
        }
        if !self.kind.is_empty() {
            names.push(self.kind.to_lowercase());
        }
        names.extend(self.short_names.iter().map(|s| s.to_lowercase()));
        if !self.group.is_empty() {
            names.push(format!("{}.{}", self.name, self.group).to_lowercase());
        }
        names
    }
}

/// Source of the cluster's advertised API surface.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn server_resources(&self) -> Result<Vec<ApiResource>, DiscoveryError>;
}

/// Resources split by scope, each list in backup priority order.
#[derive(Debug, Clone, Default)]
pub struct SortedResources {
    /// pods, persistentvolumeclaims, then the rest in catalog order.
    pub namespaced: Vec<ApiResource>,
    /// persistentvolumes, then the rest in catalog order.
    pub cluster_scoped: Vec<ApiResource>,
}

impl SortedResources {
    /// pods, pvcs, pvs, remaining namespaced, remaining cluster-scoped.
    pub fn in_backup_order(&self) -> impl Iterator<Item = &ApiResource> {
        let pods = GroupResource::pods();
        let pvcs = GroupResource::persistent_volume_claims();
        let pvs = GroupResource::persistent_volumes();

        let ns_split = self
            .namespaced
            .iter()
            .take_while(|r| {
                let gr = r.group_resource();
                gr == pods || gr == pvcs
            })
            .count();
        let cs_split = self
            .cluster_scoped
            .iter()
            .take_while(|r| r.group_resource() == pvs)
            .count();

        self.namespaced[..ns_split]
            .iter()
            .chain(&self.cluster_scoped[..cs_split])
            .chain(&self.namespaced[ns_split..])
            .chain(&self.cluster_scoped[cs_split..])
    }
}

/// Queryable catalog of the cluster's resource types. Rebuilt by `refresh`.
pub struct DiscoveryHelper {
    client: Arc<dyn DiscoveryClient>,
    resources: Vec<ApiResource>,
    by_group_resource: HashMap<GroupResource, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl DiscoveryHelper {
    /// Create and populate the catalog.
    pub async fn new(client: Arc<dyn DiscoveryClient>) -> Result<Self, DiscoveryError> {
        let mut helper = Self {
            client,
            resources: Vec::new(),
            by_group_resource: HashMap::new(),
            by_name: HashMap::new(),
        };
        helper.refresh().await?;
        Ok(helper)
    }

    /// Rebuild the catalog from the cluster.
    pub async fn refresh(&mut self) -> Result<(), DiscoveryError> {
        let advertised = self.client.server_resources().await?;
        let advertised_count = advertised.len();

        let mut seen = HashSet::new();
        let mut resources: Vec<ApiResource> = advertised
            .into_iter()
            .filter(|r| !r.is_subresource() && r.supports_backup())
            .filter(|r| seen.insert(r.group_resource()))
            .collect();
        // Stable: advertised order is kept inside each group.
        resources.sort_by(|a, b| {
            (!a.group.is_empty(), &a.group).cmp(&(!b.group.is_empty(), &b.group))
        });

        let mut by_group_resource = HashMap::with_capacity(resources.len());
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, resource) in resources.iter().enumerate() {
            by_group_resource.insert(resource.group_resource(), idx);
            for name in resource.lookup_names() {
                let candidates = by_name.entry(name).or_default();
                if !candidates.contains(&idx) {
                    candidates.push(idx);
                }
            }
        }

        tracing::debug!(
            advertised = advertised_count,
            cataloged = resources.len(),
            "Discovery catalog refreshed"
        );

        self.resources = resources;
        self.by_group_resource = by_group_resource;
        self.by_name = by_name;
        Ok(())
    }

    /// Every cataloged resource, in catalog order.
    pub fn resources(&self) -> &[ApiResource] {
        &self.resources
    }

    pub fn api_resource(&self, gr: &GroupResource) -> Option<&ApiResource> {
        self.by_group_resource.get(gr).map(|&idx| &self.resources[idx])
    }

    /// Resolve a user-supplied resource name. Ties prefer the core group, then
    /// any group other than `extensions`, then catalog order.
    pub fn resource_for(&self, name: &str) -> Option<&ApiResource> {
        let candidates = self.by_name.get(&name.trim().to_lowercase())?;
        candidates
            .iter()
            .min_by_key(|&&idx| (group_rank(&self.resources[idx].group), idx))
            .map(|&idx| &self.resources[idx])
    }

    pub fn sorted_resources(&self) -> SortedResources {
        let mut namespaced = Vec::new();
        let mut cluster_scoped = Vec::new();
        for resource in &self.resources {
            if resource.namespaced {
                namespaced.push(resource.clone());
            } else {
                cluster_scoped.push(resource.clone());
            }
        }

        let pods = GroupResource::pods();
        let pvcs = GroupResource::persistent_volume_claims();
        namespaced.sort_by_key(|r| {
            let gr = r.group_resource();
            if gr == pods {
                0
            } else if gr == pvcs {
                1
            } else {
                2
            }
        });
        let pvs = GroupResource::persistent_volumes();
        cluster_scoped.sort_by_key(|r| r.group_resource() != pvs);

        SortedResources {
            namespaced,
            cluster_scoped,
        }
    }
}

fn group_rank(group: &str) -> u8 {
    match group {
        "" => 0,
        "extensions" => 2,
        _ => 1,
    }
}
