//! Generic, schema-less representation of a cluster object.
//!
//! Objects are kept as an ordered JSON field map so that fields this crate
//! knows nothing about survive untouched through item actions and into the
//! archive.

use super::group_resource::{GroupResource, ResourceIdentifier};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceItem {
    pub group_resource: GroupResource,
    pub object: Map<String, Value>,
}

impl ResourceItem {
    pub fn new(group_resource: GroupResource, object: Map<String, Value>) -> Self {
        Self {
            group_resource,
            object,
        }
    }

    /// Wrap a JSON value; returns `None` unless it is an object.
    pub fn from_value(group_resource: GroupResource, value: Value) -> Option<Self> {
        match value {
            Value::Object(object) => Some(Self::new(group_resource, object)),
            _ => None,
        }
    }

    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.object.get("metadata").and_then(Value::as_object)
    }

    /// Metadata map, created (or replacing a non-object value) on demand.
    fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let metadata = self
            .object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        metadata.as_object_mut()
    }

    fn metadata_str(&self, field: &str) -> &str {
        self.metadata()
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn metadata_string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.metadata()
            .and_then(|m| m.get(field))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name")
    }

    /// Empty for cluster-scoped objects.
    pub fn namespace(&self) -> &str {
        self.metadata_str("namespace")
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata_string_map("labels")
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.get(key))
            .and_then(Value::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// True when the object already carries a deletion timestamp.
    pub fn is_terminating(&self) -> bool {
        self.metadata()
            .and_then(|m| m.get("deletionTimestamp"))
            .map(|ts| !ts.is_null() && ts.as_str() != Some(""))
            .unwrap_or(false)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("name".into(), Value::String(name.into()));
        }
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("namespace".into(), Value::String(namespace.into()));
        }
    }

    /// Replace all labels; `None` removes the field.
    pub fn set_labels(&mut self, labels: Option<BTreeMap<String, String>>) {
        let Some(metadata) = self.metadata_mut() else {
            return;
        };
        match labels {
            Some(labels) => {
                let map = labels
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                metadata.insert("labels".into(), Value::Object(map));
            }
            None => {
                metadata.remove("labels");
            }
        }
    }

    /// Walk nested object fields, e.g. `["spec", "volumeName"]`.
    pub fn pointer(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self.object.get(*path.first()?)?;
        for segment in &path[1..] {
            current = current.get(*segment)?;
        }
        Some(current)
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.group_resource.clone(), self.namespace(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> ResourceItem {
        ResourceItem::from_value(
            GroupResource::pods(),
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "namespace": "ns-1",
                    "name": "pod-1",
                    "labels": {"app": "web"},
                    "annotations": {"note": "x"}
                },
                "spec": {"nodeName": "node-a", "x-unknown": {"kept": true}}
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_accessors() {
        let item = pod();
        assert_eq!(item.name(), "pod-1");
        assert_eq!(item.namespace(), "ns-1");
        assert_eq!(item.label("app"), Some("web"));
        assert_eq!(item.annotation("note"), Some("x"));
        assert!(!item.is_terminating());
        assert_eq!(
            item.identifier(),
            ResourceIdentifier::new(GroupResource::pods(), "ns-1", "pod-1")
        );
    }

    #[test]
    fn test_cluster_scoped_has_empty_namespace() {
        let item = ResourceItem::from_value(
            GroupResource::persistent_volumes(),
            json!({"metadata": {"name": "pv-1"}}),
        )
        .unwrap();
        assert_eq!(item.namespace(), "");
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(ResourceItem::from_value(GroupResource::pods(), json!([1, 2])).is_none());
    }

    #[test]
    fn test_terminating_detection() {
        let item = ResourceItem::from_value(
            GroupResource::pods(),
            json!({"metadata": {"name": "p", "deletionTimestamp": "2024-01-01T00:00:00Z"}}),
        )
        .unwrap();
        assert!(item.is_terminating());
    }

    #[test]
    fn test_mutation_keeps_unknown_fields_and_order() {
        let mut item = pod();
        item.set_labels(None);
        item.set_name("renamed");

        assert!(item.labels().is_empty());
        assert_eq!(item.name(), "renamed");
        assert_eq!(
            item.pointer(&["spec", "x-unknown", "kept"]),
            Some(&json!(true))
        );

        let keys: Vec<&str> = item.object.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["apiVersion", "kind", "metadata", "spec"]);
    }

    #[test]
    fn test_set_labels_creates_metadata() {
        let mut item = ResourceItem::new(GroupResource::pods(), Map::new());
        item.set_labels(Some(BTreeMap::from([("a".to_string(), "b".to_string())])));
        assert_eq!(item.label("a"), Some("b"));
    }

    #[test]
    fn test_setters_replace_non_object_metadata() {
        let mut item =
            ResourceItem::from_value(GroupResource::pods(), json!({"metadata": "broken"})).unwrap();
        item.set_name("pod-1");
        item.set_namespace("ns-1");
        assert_eq!(item.name(), "pod-1");
        assert_eq!(item.namespace(), "ns-1");
    }
}
