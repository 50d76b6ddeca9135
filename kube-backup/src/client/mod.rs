//! Object access against the cluster.
//!
//! The backup core never talks to an API server directly; it consumes these
//! capabilities from whatever cluster-access layer the caller supplies.

pub mod dump;

pub use dump::ClusterDump;

use crate::discovery::ApiResource;
use crate::utils::errors::ClientError;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait DynamicClient: Send + Sync {
    /// List objects of one type. `None` lists across all namespaces, and is
    /// the only sensible value for cluster-scoped types.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClientError>;

    /// Fetch one object; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, ClientError>;
}
