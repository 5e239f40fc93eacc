use std::collections::HashMap;
use std::path::Component;

use meristem_domain::{PluginId, PluginManifest, SduiVersion};

use crate::error::GraphError;

/// Validate a single manifest in isolation.
///
/// Checks:
/// 1. `id` is reverse-DNS
/// 2. `version` non-empty
/// 3. `sdui_version` is MAJOR.MINOR
/// 4. `entry` is relative, non-empty, and confined to the plugin root
///
/// Enum-valued fields (`tier`, `runtime_profile`, `ui.mode`,
/// `ui_contract.*`, `permissions`) are closed at the type level; anything
/// outside the vocabulary is rejected at deserialization.
pub fn validate_manifest(manifest: &PluginManifest) -> Result<(), GraphError> {
    if !manifest.id.is_reverse_dns() {
        return Err(GraphError::InvalidId { id: manifest.id.clone() });
    }
    if manifest.version.trim().is_empty() {
        return Err(GraphError::EmptyVersion { id: manifest.id.clone() });
    }
    if SduiVersion::parse(&manifest.sdui_version).is_none() {
        return Err(GraphError::InvalidSduiVersion {
            id: manifest.id.clone(),
            value: manifest.sdui_version.clone(),
        });
    }
    if !entry_is_confined(&manifest.entry) {
        return Err(GraphError::EntryEscapesRoot {
            id: manifest.id.clone(),
            entry: manifest.entry.clone(),
        });
    }
    if manifest.ui_contract.route.trim().is_empty() {
        return Err(GraphError::MissingField { id: manifest.id.clone(), field: "ui_contract.route" });
    }
    Ok(())
}

/// Validate a keyed manifest set: per-manifest checks, id↔key agreement,
/// and dependency presence. Errors are collected; a single error is
/// returned bare, several as `Multiple`.
pub fn validate_manifest_set(
    manifests: &HashMap<PluginId, PluginManifest>,
) -> Result<(), GraphError> {
    let mut errors: Vec<GraphError> = Vec::new();

    for (key, manifest) in manifests {
        if let Err(e) = validate_manifest(manifest) {
            errors.push(e);
        }
        if key != &manifest.id {
            errors.push(GraphError::IdKeyMismatch {
                id: manifest.id.clone(),
                key: key.clone(),
            });
        }
        for dep in &manifest.dependencies {
            if !manifests.contains_key(dep) {
                errors.push(GraphError::MissingDependency {
                    id: manifest.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(GraphError::Multiple(errors)),
    }
}

/// True when `entry` is a non-empty relative path that never resolves
/// above the plugin root (`..` segments may not outnumber preceding
/// normal segments).
fn entry_is_confined(entry: &str) -> bool {
    if entry.is_empty() {
        return false;
    }
    let path = std::path::Path::new(entry);
    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_manifest;
    use meristem_domain::PluginTier;

    fn set_of(manifests: Vec<PluginManifest>) -> HashMap<PluginId, PluginManifest> {
        manifests.into_iter().map(|m| (m.id.clone(), m)).collect()
    }

    #[test]
    fn valid_manifest_passes() {
        let m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
        assert!(validate_manifest(&m).is_ok());
    }

    #[test]
    fn bare_id_rejected() {
        let m = make_manifest("relay", PluginTier::Extension, &[]);
        assert!(matches!(validate_manifest(&m), Err(GraphError::InvalidId { .. })));
    }

    #[test]
    fn empty_version_rejected() {
        let mut m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
        m.version = "  ".to_string();
        assert!(matches!(validate_manifest(&m), Err(GraphError::EmptyVersion { .. })));
    }

    #[test]
    fn bad_sdui_version_rejected() {
        let mut m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
        m.sdui_version = "1.0.0".to_string();
        assert!(matches!(validate_manifest(&m), Err(GraphError::InvalidSduiVersion { .. })));
    }

    #[test]
    fn entry_escape_rejected() {
        for entry in ["../evil.js", "/abs/path.js", "dist/../../evil.js", ""] {
            let mut m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
            m.entry = entry.to_string();
            assert!(
                validate_manifest(&m).is_err(),
                "entry '{}' should be rejected",
                entry
            );
        }
    }

    #[test]
    fn interior_parent_dir_is_fine() {
        let mut m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
        m.entry = "dist/../lib/main.js".to_string();
        assert!(validate_manifest(&m).is_ok());
    }

    #[test]
    fn missing_dependency_detected() {
        let set = set_of(vec![make_manifest(
            "io.meristem.relay",
            PluginTier::Extension,
            &["io.meristem.ghost"],
        )]);
        assert!(matches!(
            validate_manifest_set(&set),
            Err(GraphError::MissingDependency { .. })
        ));
    }

    #[test]
    fn id_key_mismatch_detected() {
        let m = make_manifest("io.meristem.relay", PluginTier::Extension, &[]);
        let mut set = HashMap::new();
        set.insert(PluginId::new("io.meristem.other"), m);
        assert!(matches!(validate_manifest_set(&set), Err(GraphError::IdKeyMismatch { .. })));
    }

    #[test]
    fn multiple_errors_collected() {
        let mut bad = make_manifest("relay", PluginTier::Extension, &["io.meristem.ghost"]);
        bad.version = String::new();
        let set = set_of(vec![bad]);
        match validate_manifest_set(&set) {
            Err(GraphError::Multiple(errors)) => assert!(errors.len() >= 2),
            other => panic!("expected Multiple, got {:?}", other),
        }
    }
}
