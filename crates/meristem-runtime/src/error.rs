use meristem_domain::{LifecycleState, PluginId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("plugin '{0}' is not installed")]
    UnknownPlugin(PluginId),

    #[error("illegal lifecycle transition for '{plugin_id}': {from} -> {to}")]
    IllegalTransition { plugin_id: PluginId, from: LifecycleState, to: LifecycleState },

    #[error("operation already in progress for '{0}'")]
    OperationInProgress(PluginId),

    #[error("isolate error for '{plugin_id}': {source}")]
    Isolate {
        plugin_id: PluginId,
        #[source]
        source: meristem_isolate::IsolateError,
    },

    #[error("store error: {0}")]
    Store(#[from] meristem_store::StoreError),

    #[error("hook '{hook}' failed for '{plugin_id}': {reason}")]
    HookFailed { plugin_id: PluginId, hook: String, reason: String },

    #[error("reload failed for '{plugin_id}': {reason}")]
    ReloadFailed { plugin_id: PluginId, reason: String },
}
