//! Version-independent resource type identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// API group plus plural resource name. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// A resource in the core (empty) group.
    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }

    pub fn pods() -> Self {
        Self::core("pods")
    }

    pub fn persistent_volume_claims() -> Self {
        Self::core("persistentvolumeclaims")
    }

    pub fn persistent_volumes() -> Self {
        Self::core("persistentvolumes")
    }

    pub fn namespaces() -> Self {
        Self::core("namespaces")
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Reference to one concrete object: type, namespace (empty for cluster-scoped) and name.
///
/// Doubles as the key of the per-run backed-up set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub group_resource: GroupResource,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentifier {
    pub fn new(
        group_resource: GroupResource,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_resource,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(group_resource: GroupResource, name: impl Into<String>) -> Self {
        Self::new(group_resource, "", name)
    }

    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.group_resource, self.name)
        } else {
            write!(f, "{} {}/{}", self.group_resource, self.namespace, self.name)
        }
    }
}
