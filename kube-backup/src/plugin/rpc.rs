//! Request/response protocol for plugins living in another process.
//!
//! Every message is a JSON envelope `{"request_id": ..., "body": {"type": ..., "payload": ...}}`.
//! Responses echo the request id of the call they answer.

use super::guard::call_guarded;
use super::{ExecuteOutput, ItemAction, PluginRegistry, ResourceSelector, VolumeInfo, VolumeSnapshotter};
use crate::model::{BackupSpec, ResourceItem};
use crate::utils::errors::PluginError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage<T> {
    pub request_id: String,
    pub body: T,
}

impl<T> RpcMessage<T> {
    pub fn new(body: T) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            body,
        }
    }
}

/// Calls from the backup core to a plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PluginRequest {
    #[serde(rename = "action:applies_to")]
    AppliesTo { plugin: String },

    #[serde(rename = "action:execute")]
    Execute {
        plugin: String,
        item: ResourceItem,
        backup: BackupSpec,
    },

    /// Creates (or re-creates) the snapshotter instance `instance`.
    #[serde(rename = "snapshotter:init")]
    InitSnapshotter {
        plugin: String,
        instance: String,
        config: BTreeMap<String, String>,
    },

    #[serde(rename = "snapshotter:volume_id")]
    GetVolumeId {
        plugin: String,
        instance: String,
        volume: ResourceItem,
    },

    #[serde(rename = "snapshotter:volume_info")]
    GetVolumeInfo {
        plugin: String,
        instance: String,
        volume_id: String,
        az: String,
    },

    #[serde(rename = "snapshotter:create_snapshot")]
    CreateSnapshot {
        plugin: String,
        instance: String,
        volume_id: String,
        az: String,
        tags: BTreeMap<String, String>,
    },

    /// Drops the instance. Closing an unknown instance is not an error.
    #[serde(rename = "snapshotter:close")]
    CloseSnapshotter { plugin: String, instance: String },
}

impl PluginRequest {
    pub fn plugin(&self) -> &str {
        match self {
            PluginRequest::AppliesTo { plugin }
            | PluginRequest::Execute { plugin, .. }
            | PluginRequest::InitSnapshotter { plugin, .. }
            | PluginRequest::GetVolumeId { plugin, .. }
            | PluginRequest::GetVolumeInfo { plugin, .. }
            | PluginRequest::CreateSnapshot { plugin, .. }
            | PluginRequest::CloseSnapshotter { plugin, .. } => plugin,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            PluginRequest::AppliesTo { .. } => "applies_to",
            PluginRequest::Execute { .. } => "execute",
            PluginRequest::InitSnapshotter { .. } => "init",
            PluginRequest::GetVolumeId { .. } => "get_volume_id",
            PluginRequest::GetVolumeInfo { .. } => "get_volume_info",
            PluginRequest::CreateSnapshot { .. } => "create_snapshot",
            PluginRequest::CloseSnapshotter { .. } => "close",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PluginResponse {
    #[serde(rename = "action:applies_to")]
    AppliesTo(ResourceSelector),

    #[serde(rename = "action:execute")]
    Execute(ExecuteOutput),

    #[serde(rename = "snapshotter:init")]
    Initialized,

    #[serde(rename = "snapshotter:volume_id")]
    VolumeId(Option<String>),

    #[serde(rename = "snapshotter:volume_info")]
    VolumeInfo(VolumeInfo),

    #[serde(rename = "snapshotter:create_snapshot")]
    SnapshotCreated(String),

    #[serde(rename = "snapshotter:close")]
    Closed,

    #[serde(rename = "error")]
    Error { message: String },
}

/// A reliable request/response channel to a plugin process.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, request: PluginRequest) -> Result<PluginResponse, PluginError>;
}

fn unexpected(plugin: &str, response: PluginResponse) -> PluginError {
    match response {
        PluginResponse::Error { message } => PluginError::failed(plugin, message),
        other => PluginError::Protocol(format!("unexpected response from {plugin}: {other:?}")),
    }
}

/// Serves registered plugins to remote callers.
pub struct PluginServer {
    registry: Arc<PluginRegistry>,
    instances: DashMap<String, Arc<dyn VolumeSnapshotter>>,
}

impl PluginServer {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            instances: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Snapshotter instances initialised and not yet closed.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Answer one request. Plugin errors and panics become `Error` responses.
    pub async fn handle(&self, request: PluginRequest) -> PluginResponse {
        let plugin = request.plugin().to_string();
        let operation = request.operation();
        match call_guarded(&plugin, operation, self.dispatch(request)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(plugin = %plugin, operation, error = %e, "Plugin call failed");
                PluginResponse::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Decode, answer and encode one text frame. Frames without a readable
    /// request id cannot be answered and yield `None`.
    pub async fn handle_text(&self, text: &str) -> Option<String> {
        let response = match serde_json::from_str::<RpcMessage<PluginRequest>>(text) {
            Ok(message) => RpcMessage {
                request_id: message.request_id,
                body: self.handle(message.body).await,
            },
            Err(e) => {
                let request_id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("request_id")?.as_str().map(str::to_string));
                let Some(request_id) = request_id else {
                    tracing::warn!(error = %e, "Dropping unreadable plugin request");
                    return None;
                };
                RpcMessage {
                    request_id,
                    body: PluginResponse::Error {
                        message: format!("malformed request: {e}"),
                    },
                }
            }
        };

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode plugin response");
                None
            }
        }
    }

    fn item_action(&self, plugin: &str) -> Result<Arc<dyn ItemAction>, PluginError> {
        self.registry
            .item_action(plugin)
            .ok_or_else(|| PluginError::NotFound(plugin.to_string()))
    }

    fn instance(&self, plugin: &str, instance: &str) -> Result<Arc<dyn VolumeSnapshotter>, PluginError> {
        self.instances
            .get(instance)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PluginError::failed(plugin, format!("snapshotter instance {instance} not initialized")))
    }

    async fn dispatch(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        match request {
            PluginRequest::AppliesTo { plugin } => {
                let selector = self.item_action(&plugin)?.applies_to().await?;
                Ok(PluginResponse::AppliesTo(selector))
            }
            PluginRequest::Execute {
                plugin,
                item,
                backup,
            } => {
                let output = self.item_action(&plugin)?.execute(item, &backup).await?;
                Ok(PluginResponse::Execute(output))
            }
            PluginRequest::InitSnapshotter {
                plugin,
                instance,
                config,
            } => {
                let mut snapshotter = self
                    .registry
                    .new_volume_snapshotter(&plugin)
                    .ok_or_else(|| PluginError::NotFound(plugin.clone()))?;
                snapshotter.init(&config).await?;
                self.instances.insert(instance, Arc::from(snapshotter));
                Ok(PluginResponse::Initialized)
            }
            PluginRequest::GetVolumeId {
                plugin,
                instance,
                volume,
            } => {
                let id = self.instance(&plugin, &instance)?.get_volume_id(&volume).await?;
                Ok(PluginResponse::VolumeId(id))
            }
            PluginRequest::GetVolumeInfo {
                plugin,
                instance,
                volume_id,
                az,
            } => {
                let info = self
                    .instance(&plugin, &instance)?
                    .get_volume_info(&volume_id, &az)
                    .await?;
                Ok(PluginResponse::VolumeInfo(info))
            }
            PluginRequest::CreateSnapshot {
                plugin,
                instance,
                volume_id,
                az,
                tags,
            } => {
                let snapshot_id = self
                    .instance(&plugin, &instance)?
                    .create_snapshot(&volume_id, &az, &tags)
                    .await?;
                Ok(PluginResponse::SnapshotCreated(snapshot_id))
            }
            PluginRequest::CloseSnapshotter { plugin, instance } => {
                if let Some((_, snapshotter)) = self.instances.remove(&instance) {
                    tracing::debug!(plugin = %plugin, instance = %instance, "Closing snapshotter instance");
                    snapshotter.close().await?;
                }
                Ok(PluginResponse::Closed)
            }
        }
    }
}

/// Talks to a `PluginServer` in this process through the JSON wire format.
pub struct LocalTransport {
    server: Arc<PluginServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<PluginServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl RpcTransport for LocalTransport {
    async fn call(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let message = RpcMessage::new(request);
        let text = serde_json::to_string(&message).map_err(|e| PluginError::Protocol(e.to_string()))?;
        let reply = self
            .server
            .handle_text(&text)
            .await
            .ok_or_else(|| PluginError::Transport("no reply".to_string()))?;
        let reply: RpcMessage<PluginResponse> =
            serde_json::from_str(&reply).map_err(|e| PluginError::Protocol(e.to_string()))?;
        if reply.request_id != message.request_id {
            return Err(PluginError::Protocol(format!(
                "reply for {} does not match request {}",
                reply.request_id, message.request_id
            )));
        }
        Ok(reply.body)
    }
}

/// Client side of a remote item action.
pub struct RemoteItemAction {
    name: String,
    transport: Arc<dyn RpcTransport>,
}

impl RemoteItemAction {
    pub fn new(name: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }
}

#[async_trait]
impl ItemAction for RemoteItemAction {
    async fn applies_to(&self) -> Result<ResourceSelector, PluginError> {
        let request = PluginRequest::AppliesTo {
            plugin: self.name.clone(),
        };
        match self.transport.call(request).await? {
            PluginResponse::AppliesTo(selector) => Ok(selector),
            other => Err(unexpected(&self.name, other)),
        }
    }

    async fn execute(
        &self,
        item: ResourceItem,
        backup: &BackupSpec,
    ) -> Result<ExecuteOutput, PluginError> {
        let request = PluginRequest::Execute {
            plugin: self.name.clone(),
            item,
            backup: backup.clone(),
        };
        match self.transport.call(request).await? {
            PluginResponse::Execute(output) => Ok(output),
            other => Err(unexpected(&self.name, other)),
        }
    }
}

/// Client side of one remote snapshotter instance.
///
/// The server-side instance is released by `close`, or on drop when a tokio
/// runtime is available to send the request.
pub struct RemoteVolumeSnapshotter {
    name: String,
    instance: String,
    transport: Arc<dyn RpcTransport>,
    /// Set once an init request went out; the server may hold an instance.
    initialized: bool,
    closed: AtomicBool,
}

impl RemoteVolumeSnapshotter {
    pub fn new(name: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            name: name.into(),
            instance: uuid::Uuid::new_v4().to_string(),
            transport,
            initialized: false,
            closed: AtomicBool::new(false),
        }
    }

    fn close_request(&self) -> PluginRequest {
        PluginRequest::CloseSnapshotter {
            plugin: self.name.clone(),
            instance: self.instance.clone(),
        }
    }
}

impl Drop for RemoteVolumeSnapshotter {
    fn drop(&mut self) {
        if !self.initialized || self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(plugin = %self.name, instance = %self.instance, "No runtime to release snapshotter instance");
            return;
        };
        let transport = self.transport.clone();
        let request = self.close_request();
        let name = self.name.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.call(request).await {
                tracing::debug!(plugin = %name, error = %e, "Failed to release snapshotter instance");
            }
        });
    }
}

#[async_trait]
impl VolumeSnapshotter for RemoteVolumeSnapshotter {
    async fn init(&mut self, config: &BTreeMap<String, String>) -> Result<(), PluginError> {
        let request = PluginRequest::InitSnapshotter {
            plugin: self.name.clone(),
            instance: self.instance.clone(),
            config: config.clone(),
        };
        self.initialized = true;
        match self.transport.call(request).await? {
            PluginResponse::Initialized => Ok(()),
            other => Err(unexpected(&self.name, other)),
        }
    }

    async fn get_volume_id(&self, volume: &ResourceItem) -> Result<Option<String>, PluginError> {
        let request = PluginRequest::GetVolumeId {
            plugin: self.name.clone(),
            instance: self.instance.clone(),
            volume: volume.clone(),
        };
        match self.transport.call(request).await? {
            PluginResponse::VolumeId(id) => Ok(id),
            other => Err(unexpected(&self.name, other)),
        }
    }

    async fn get_volume_info(&self, volume_id: &str, az: &str) -> Result<VolumeInfo, PluginError> {
        let request = PluginRequest::GetVolumeInfo {
            plugin: self.name.clone(),
            instance: self.instance.clone(),
            volume_id: volume_id.to_string(),
            az: az.to_string(),
        };
        match self.transport.call(request).await? {
            PluginResponse::VolumeInfo(info) => Ok(info),
            other => Err(unexpected(&self.name, other)),
        }
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        az: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String, PluginError> {
        let request = PluginRequest::CreateSnapshot {
            plugin: self.name.clone(),
            instance: self.instance.clone(),
            volume_id: volume_id.to_string(),
            az: az.to_string(),
            tags: tags.clone(),
        };
        match self.transport.call(request).await? {
            PluginResponse::SnapshotCreated(id) => Ok(id),
            other => Err(unexpected(&self.name, other)),
        }
    }

    async fn close(&self) -> Result<(), PluginError> {
        if !self.initialized || self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.transport.call(self.close_request()).await? {
            PluginResponse::Closed => Ok(()),
            other => Err(unexpected(&self.name, other)),
        }
    }
}
