//! Include/exclude filtering of resource types, namespaces and labels.

pub mod label_selector;
pub mod scope;

pub use label_selector::LabelSelector;
pub use scope::ScopeFilter;

use crate::discovery::DiscoveryHelper;

pub const WILDCARD: &str = "*";

/// An include list and an exclude list of plain strings.
///
/// Excludes win. An empty include list, or one containing `*`, includes
/// everything not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludesExcludes {
    includes: Vec<String>,
    excludes: Vec<String>,
    /// Names given by the user that did not resolve to any known type.
    unresolved: Vec<String>,
}

impl IncludesExcludes {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self {
            includes,
            excludes,
            unresolved: Vec::new(),
        }
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    pub fn should_include(&self, s: &str) -> bool {
        if self.excludes.iter().any(|e| e == s) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|i| i == WILDCARD || i == s)
    }

    /// True when the include list does not narrow anything down.
    pub fn includes_all(&self) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|i| i == WILDCARD)
    }
}

/// Resolve user-supplied resource names into canonical `resource[.group]`
/// strings.
///
/// `*` among the includes wins outright and discards every other name on both
/// sides. `*` among the excludes is dropped. Names discovery cannot resolve
/// are dropped as well.
pub fn resource_includes_excludes(
    helper: &DiscoveryHelper,
    includes: &[String],
    excludes: &[String],
) -> IncludesExcludes {
    if includes.iter().any(|i| i == WILDCARD) {
        return IncludesExcludes::new(vec![WILDCARD.to_string()], Vec::new());
    }

    let mut unresolved = Vec::new();
    let mut resolve = |names: &[String]| -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        for name in names.iter().filter(|n| n.as_str() != WILDCARD) {
            match helper.resource_for(name) {
                Some(resource) => {
                    let gr = resource.group_resource().to_string();
                    if !resolved.contains(&gr) {
                        resolved.push(gr);
                    }
                }
                None => {
                    tracing::warn!(resource = %name, "Ignoring unresolvable resource name");
                    unresolved.push(name.clone());
                }
            }
        }
        resolved
    };

    let includes = resolve(includes);
    let excludes = resolve(excludes);
    IncludesExcludes {
        includes,
        excludes,
        unresolved,
    }
}
