//! Call boundary for plugin code.
//!
//! Plugins are untrusted: a panic inside one must come back as an ordinary
//! `PluginError` and a hung call must not block the run.

use crate::utils::errors::PluginError;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// Await a plugin call, converting a panic into `PluginError::Panicked`.
pub async fn call_guarded<T, F>(plugin: &str, operation: &str, call: F) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(plugin, operation, %message, "Plugin panicked");
            Err(PluginError::Panicked {
                plugin: plugin.to_string(),
                operation: operation.to_string(),
                message,
            })
        }
    }
}

/// Like `call_guarded`, bounded by `timeout`.
pub async fn call_guarded_with_timeout<T, F>(
    plugin: &str,
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    match tokio::time::timeout(timeout, call_guarded(plugin, operation, call)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(plugin, operation, timeout_ms = timeout.as_millis() as u64, "Plugin call timed out");
            Err(PluginError::Timeout {
                plugin: plugin.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
