//! Resources served by more than one API group.
//!
//! Some types are exposed both under a legacy group and under their current
//! one. When both are present only the preferred group is backed up.

use crate::discovery::DiscoveryHelper;
use crate::model::GroupResource;
use std::collections::HashMap;

struct Cohabitation {
    resource: &'static str,
    preferred: &'static str,
    alternates: &'static [&'static str],
}

const COHABITATING_RESOURCES: &[Cohabitation] = &[
    Cohabitation {
        resource: "deployments",
        preferred: "apps",
        alternates: &["extensions"],
    },
    Cohabitation {
        resource: "daemonsets",
        preferred: "apps",
        alternates: &["extensions"],
    },
    Cohabitation {
        resource: "replicasets",
        preferred: "apps",
        alternates: &["extensions"],
    },
    Cohabitation {
        resource: "networkpolicies",
        preferred: "networking.k8s.io",
        alternates: &["extensions"],
    },
    Cohabitation {
        resource: "podsecuritypolicies",
        preferred: "policy",
        alternates: &["extensions"],
    },
    Cohabitation {
        resource: "events",
        preferred: "",
        alternates: &["events.k8s.io"],
    },
];

/// Decisions for one run, computed from the catalog at the start of the run.
#[derive(Debug, Clone, Default)]
pub struct CohabitationResolver {
    /// Skipped alternate -> preferred group resource.
    preferred_for: HashMap<GroupResource, GroupResource>,
}

impl CohabitationResolver {
    pub fn new(helper: &DiscoveryHelper) -> Self {
        let mut preferred_for = HashMap::new();
        for entry in COHABITATING_RESOURCES {
            let preferred = GroupResource::new(entry.preferred, entry.resource);
            if helper.api_resource(&preferred).is_none() {
                continue;
            }
            for alternate in entry.alternates {
                let alternate = GroupResource::new(*alternate, entry.resource);
                if helper.api_resource(&alternate).is_some() {
                    preferred_for.insert(alternate, preferred.clone());
                }
            }
        }
        Self { preferred_for }
    }

    pub fn should_skip(&self, gr: &GroupResource) -> bool {
        self.preferred_for.contains_key(gr)
    }

    /// The group resource to use in place of `gr`.
    pub fn resolve(&self, gr: &GroupResource) -> GroupResource {
        self.preferred_for
            .get(gr)
            .cloned()
            .unwrap_or_else(|| gr.clone())
    }
}
