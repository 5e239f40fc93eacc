use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use meristem_domain::{Permission, PluginManifest};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::message::{InvokePayload, InvokeResultPayload};

/// Stable error codes returned to isolates through INVOKE_RESULT frames.
pub const CAPABILITY_NOT_FOUND: &str = "CAPABILITY_NOT_FOUND";
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const BRIDGE_ERROR: &str = "PLUGIN_CONTEXT_BRIDGE_ERROR";

pub type CapabilityFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
pub type CapabilityHandler = Arc<dyn Fn(Value) -> CapabilityFuture + Send + Sync>;

struct CapabilityEntry {
    required: Permission,
    handler: CapabilityHandler,
}

/// The sole conduit for host calls from isolates. Every capability is
/// registered with the permission a manifest must declare to call it.
#[derive(Default)]
pub struct CapabilityBroker {
    capabilities: RwLock<HashMap<String, CapabilityEntry>>,
}

impl CapabilityBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        required: Permission,
        handler: CapabilityHandler,
    ) {
        self.capabilities
            .write()
            .await
            .insert(name.into(), CapabilityEntry { required, handler });
    }

    /// Dispatch one INVOKE addressed to a capability: look it up, verify
    /// the manifest declares the required permission, run the handler.
    /// Uncaught handler errors become `PLUGIN_CONTEXT_BRIDGE_ERROR`.
    pub async fn dispatch(
        &self,
        manifest: &PluginManifest,
        invoke: &InvokePayload,
    ) -> InvokeResultPayload {
        let guard = self.capabilities.read().await;
        let entry = match guard.get(&invoke.method) {
            Some(entry) => entry,
            None => {
                return InvokeResultPayload::err(
                    CAPABILITY_NOT_FOUND,
                    format!("no capability '{}'", invoke.method),
                )
            }
        };
        if !manifest.declares(entry.required) {
            warn!(
                plugin_id = %manifest.id,
                capability = %invoke.method,
                required = %entry.required,
                "undeclared capability call rejected"
            );
            return InvokeResultPayload::err(
                PERMISSION_DENIED,
                format!("capability '{}' requires '{}'", invoke.method, entry.required),
            );
        }
        let handler = entry.handler.clone();
        drop(guard);

        match handler(invoke.params.clone()).await {
            Ok(data) => InvokeResultPayload::ok(data),
            Err(message) => InvokeResultPayload::err(BRIDGE_ERROR, message),
        }
    }
}

/// The plugin-scoped capability façade: a manifest bound to the broker.
#[derive(Clone)]
pub struct PluginContext {
    pub manifest: Arc<PluginManifest>,
    broker: Arc<CapabilityBroker>,
}

impl PluginContext {
    pub fn new(manifest: Arc<PluginManifest>, broker: Arc<CapabilityBroker>) -> Self {
        Self { manifest, broker }
    }

    pub async fn call(&self, method: &str, params: Value) -> InvokeResultPayload {
        let invoke = InvokePayload { method: method.to_string(), params };
        self.broker.dispatch(&self.manifest, &invoke).await
    }
}
