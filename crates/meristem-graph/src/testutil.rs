use meristem_domain::{
    DefaultLogLevel, PluginId, PluginManifest, PluginTier, RuntimeProfile, StreamProfile,
    UiContract, UiMode, UiSpec,
};

pub(crate) fn make_manifest(id: &str, tier: PluginTier, deps: &[&str]) -> PluginManifest {
    PluginManifest {
        id: PluginId::new(id),
        version: "1.0.0".to_string(),
        tier,
        runtime_profile: RuntimeProfile::Sandbox,
        sdui_version: "1.0".to_string(),
        dependencies: deps.iter().map(|d| PluginId::new(*d)).collect(),
        entry: "dist/main.js".to_string(),
        ui: UiSpec { mode: UiMode::Sdui, entry: None, icon: None },
        ui_contract: UiContract {
            route: format!("/plugins/{}", id),
            channels: vec![format!("plugin.{}.events", id)],
            default_log_level: DefaultLogLevel::Info,
            stream_profile: StreamProfile::Balanced,
        },
        permissions: Default::default(),
        events: Default::default(),
        exports: Default::default(),
    }
}
