use crate::registry::{InstalledPlugin, RegistryEntry};

/// Render registry search results as human-readable text.
pub fn render_registry(entries: &[&RegistryEntry]) -> String {
    if entries.is_empty() {
        return "No matching plugins.\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let marker = if entry.required { " [required]" } else { "" };
        out.push_str(&format!(
            "{} {} ({}){}\n",
            entry.manifest.id, entry.manifest.version, entry.reference, marker
        ));
        if !entry.description.is_empty() {
            out.push_str(&format!("    {}\n", entry.description));
        }
    }
    out
}

/// Render the installed plugin list.
pub fn render_installed(plugins: &[InstalledPlugin]) -> String {
    if plugins.is_empty() {
        return "No plugins installed.\n".to_string();
    }
    let mut out = String::new();
    for plugin in plugins {
        out.push_str(&format!(
            "{} {} ({}) tier={} profile={:?}\n",
            plugin.manifest.id,
            plugin.manifest.version,
            plugin.reference,
            plugin.manifest.tier,
            plugin.manifest.runtime_profile,
        ));
    }
    out
}
