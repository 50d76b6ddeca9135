//! A cluster captured as a JSON document.
//!
//! ```json
//! { "resources": [ { "group": "", "version": "v1", "name": "pods", "kind": "Pod",
//!                    "namespaced": true, "items": [ { "metadata": { ... } } ] } ] }
//! ```
//!
//! Serves both discovery and object access, which makes it the offline input
//! of the CLI and the fake cluster used throughout the tests.

use super::DynamicClient;
use crate::discovery::{ApiResource, DiscoveryClient};
use crate::model::GroupResource;
use crate::utils::errors::{ClientError, DiscoveryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpedResource {
    #[serde(flatten)]
    pub resource: ApiResource,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClusterDump {
    pub resources: Vec<DumpedResource>,

    #[serde(skip)]
    failing_lists: HashSet<GroupResource>,
    #[serde(skip)]
    list_calls: Mutex<Vec<(GroupResource, Option<String>)>>,
}

impl ClusterDump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    pub fn with_resource(mut self, resource: ApiResource) -> Self {
        self.resources.push(DumpedResource {
            resource,
            items: Vec::new(),
        });
        self
    }

    /// Add an object to the first advertised entry for `gr`. Objects for
    /// types that were never advertised are dropped.
    pub fn with_item(mut self, gr: &GroupResource, object: Value) -> Self {
        if let Some(entry) = self
            .resources
            .iter_mut()
            .find(|r| &r.resource.group_resource() == gr)
        {
            entry.items.push(object);
        }
        self
    }

    /// Make every list call for `gr` fail.
    pub fn with_failing_list(mut self, gr: GroupResource) -> Self {
        self.failing_lists.insert(gr);
        self
    }

    /// Every list call made so far, in order.
    pub fn list_calls(&self) -> Vec<(GroupResource, Option<String>)> {
        self.list_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn entry(&self, resource: &ApiResource) -> Option<&DumpedResource> {
        let gr = resource.group_resource();
        self.resources
            .iter()
            .find(|r| r.resource.group_resource() == gr)
    }
}

fn object_field<'a>(object: &'a Value, field: &str) -> &'a str {
    object
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

#[async_trait]
impl DiscoveryClient for ClusterDump {
    async fn server_resources(&self) -> Result<Vec<ApiResource>, DiscoveryError> {
        Ok(self.resources.iter().map(|r| r.resource.clone()).collect())
    }
}

#[async_trait]
impl DynamicClient for ClusterDump {
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let gr = resource.group_resource();
        if let Ok(mut calls) = self.list_calls.lock() {
            calls.push((gr.clone(), namespace.map(str::to_string)));
        }
        if self.failing_lists.contains(&gr) {
            return Err(ClientError::Request(format!("list {gr} refused")));
        }

        let entry = self
            .entry(resource)
            .ok_or_else(|| ClientError::UnknownResource(gr.to_string()))?;
        Ok(entry
            .items
            .iter()
            .filter(|item| namespace.map_or(true, |ns| object_field(item, "namespace") == ns))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, ClientError> {
        let entry = self
            .entry(resource)
            .ok_or_else(|| ClientError::UnknownResource(resource.group_resource().to_string()))?;
        Ok(entry
            .items
            .iter()
            .find(|item| {
                object_field(item, "name") == name && object_field(item, "namespace") == namespace
            })
            .cloned())
    }
}
