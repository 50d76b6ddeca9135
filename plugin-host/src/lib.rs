//! Serves backup item actions and volume snapshotters to remote backup runs.

pub mod config;
pub mod ws;

use axum::routing::get;
use axum::Router;
use kube_backup::plugin::rpc::PluginServer;
use kube_backup::plugin::PluginRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const PLUGIN_PATH: &str = "/ws/plugins";

/// A server for the plugins compiled into this binary.
pub fn builtin_server() -> Arc<PluginServer> {
    Arc::new(PluginServer::new(Arc::new(PluginRegistry::with_builtins())))
}

pub fn router(server: Arc<PluginServer>) -> Router {
    Router::new()
        .route(PLUGIN_PATH, get(ws::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}
