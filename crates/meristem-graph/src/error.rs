use meristem_domain::PluginId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("manifest '{id}' is missing required field '{field}'")]
    MissingField { id: PluginId, field: &'static str },

    #[error("manifest '{id}' has an invalid id: expected reverse-DNS")]
    InvalidId { id: PluginId },

    #[error("manifest id '{id}' does not match its map key '{key}'")]
    IdKeyMismatch { id: PluginId, key: PluginId },

    #[error("manifest '{id}' has an empty version")]
    EmptyVersion { id: PluginId },

    #[error("manifest '{id}' has an invalid sdui_version '{value}': expected MAJOR.MINOR")]
    InvalidSduiVersion { id: PluginId, value: String },

    #[error("manifest '{id}' entry '{entry}' escapes the plugin root")]
    EntryEscapesRoot { id: PluginId, entry: String },

    #[error("manifest '{id}' depends on unknown plugin '{dependency}'")]
    MissingDependency { id: PluginId, dependency: PluginId },

    #[error("dependency cycle: {}", trace.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> "))]
    CycleDetected { trace: Vec<PluginId> },

    #[error("multiple validation errors: {0:?}")]
    Multiple(Vec<GraphError>),
}
