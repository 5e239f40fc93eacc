use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use meristem_domain::{PluginId, PluginManifest};
use meristem_graph::{topo_order, validate_manifest, validate_manifest_set};
use serde::{Deserialize, Serialize};

/// One registry listing: a manifest plus distribution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub manifest: PluginManifest,
    /// Registry ref (tag/revision) this listing points at.
    pub reference: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub entries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub manifest: PluginManifest,
    pub reference: String,
    pub installed_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstalledDb {
    pub plugins: Vec<InstalledPlugin>,
}

pub fn cache_path(home: &Path) -> PathBuf {
    home.join("registry.json")
}

pub fn installed_path(home: &Path) -> PathBuf {
    home.join("installed.json")
}

pub fn load_cache(home: &Path) -> Result<RegistryIndex> {
    let path = cache_path(home);
    if !path.exists() {
        bail!("no registry cache at {}; run -Sy first", path.display());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn store_cache(home: &Path, index: &RegistryIndex) -> Result<()> {
    std::fs::create_dir_all(home)?;
    let raw = serde_json::to_string_pretty(index)?;
    std::fs::write(cache_path(home), raw)?;
    Ok(())
}

pub fn load_installed(home: &Path) -> Result<InstalledDb> {
    let path = installed_path(home);
    if !path.exists() {
        return Ok(InstalledDb::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn store_installed(home: &Path, db: &InstalledDb) -> Result<()> {
    std::fs::create_dir_all(home)?;
    let raw = serde_json::to_string_pretty(db)?;
    std::fs::write(installed_path(home), raw)?;
    Ok(())
}

/// Resolve install targets to a dependency-ordered manifest list,
/// pulling transitive dependencies from the registry.
pub fn resolve_install(
    index: &RegistryIndex,
    targets: &[String],
    reference: Option<&str>,
) -> Result<Vec<RegistryEntry>> {
    let by_id: HashMap<PluginId, &RegistryEntry> =
        index.entries.iter().map(|e| (e.manifest.id.clone(), e)).collect();

    let mut wanted: Vec<PluginId> = Vec::new();
    let mut queue: Vec<PluginId> = targets.iter().map(PluginId::new).collect();
    while let Some(id) = queue.pop() {
        let entry = by_id
            .get(&id)
            .with_context(|| format!("plugin '{}' not found in registry", id))?;
        if let Some(wanted_ref) = reference {
            if targets.iter().any(|t| PluginId::new(t) == id) && entry.reference != wanted_ref {
                bail!(
                    "plugin '{}' is published at ref '{}', not '{}'",
                    id,
                    entry.reference,
                    wanted_ref
                );
            }
        }
        if !wanted.contains(&id) {
            wanted.push(id.clone());
            for dep in &entry.manifest.dependencies {
                queue.push(dep.clone());
            }
        }
    }

    // Validate the closed set, then order dependencies first.
    let set: HashMap<PluginId, PluginManifest> = wanted
        .iter()
        .map(|id| (id.clone(), by_id[id].manifest.clone()))
        .collect();
    validate_manifest_set(&set).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let order = topo_order(&set)
        .into_result()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    Ok(order.into_iter().map(|id| by_id[&id].clone()).collect())
}

/// Manifest + filesystem checks for every installed plugin. Returns the
/// list of problems found.
pub fn check_installed(db: &InstalledDb, base_path: &Path) -> Vec<String> {
    let mut problems = Vec::new();
    for installed in &db.plugins {
        if let Err(e) = validate_manifest(&installed.manifest) {
            problems.push(format!("{}: {}", installed.manifest.id, e));
        }
        let entry = base_path
            .join(installed.manifest.id.as_str())
            .join(&installed.manifest.entry);
        if !entry.exists() {
            problems.push(format!(
                "{}: entry '{}' missing on disk",
                installed.manifest.id,
                entry.display()
            ));
        }
    }
    problems
}
