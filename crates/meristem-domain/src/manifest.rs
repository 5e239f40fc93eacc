use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::permission::Permission;
use crate::types::PluginId;

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTier {
    Core,
    Extension,
}

impl std::fmt::Display for PluginTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginTier::Core => write!(f, "core"),
            PluginTier::Extension => write!(f, "extension"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    Hotpath,
    Sandbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UiMode {
    Sdui,
    Esm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultLogLevel {
    Info,
    Debug,
}

// ── Stream profiles ───────────────────────────────────────────────────────────

/// Throttle preset governing WebSocket push rate per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProfile {
    Realtime,
    Balanced,
    Conserve,
}

impl StreamProfile {
    pub fn params(self) -> StreamParams {
        match self {
            StreamProfile::Realtime => StreamParams { min_interval_ms: 0, batch_max_size: 1 },
            StreamProfile::Balanced => StreamParams { min_interval_ms: 120, batch_max_size: 10 },
            StreamProfile::Conserve => StreamParams { min_interval_ms: 500, batch_max_size: 20 },
        }
    }
}

impl std::fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamProfile::Realtime => write!(f, "realtime"),
            StreamProfile::Balanced => write!(f, "balanced"),
            StreamProfile::Conserve => write!(f, "conserve"),
        }
    }
}

/// Resolved throttle parameters for one `(connection, topic)` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub min_interval_ms: u64,
    pub batch_max_size: u32,
}

impl StreamParams {
    /// A partial override on top of `self`; absent fields keep the preset.
    pub fn with_overrides(self, min_interval_ms: Option<u64>, batch_max_size: Option<u32>) -> Self {
        StreamParams {
            min_interval_ms: min_interval_ms.unwrap_or(self.min_interval_ms),
            batch_max_size: batch_max_size.unwrap_or(self.batch_max_size),
        }
    }
}

// ── SDUI version ──────────────────────────────────────────────────────────────

/// MAJOR.MINOR pair used by the SDUI compatibility negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SduiVersion {
    pub major: u32,
    pub minor: u32,
}

impl SduiVersion {
    /// Parse `"MAJOR.MINOR"`; anything else is rejected.
    pub fn parse(s: &str) -> Option<SduiVersion> {
        let (major, minor) = s.split_once('.')?;
        if major.is_empty() || minor.is_empty() {
            return None;
        }
        if !major.bytes().all(|b| b.is_ascii_digit()) || !minor.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(SduiVersion { major: major.parse().ok()?, minor: minor.parse().ok()? })
    }
}

impl std::fmt::Display for SduiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// UI behavior when a plugin's SDUI version is incompatible with the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SduiFallback {
    Hide,
    BasicFallback,
}

// ── Manifest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSpec {
    pub mode: UiMode,
    pub entry: Option<String>,
    pub icon: Option<String>,
}

/// Per-plugin declaration of the topics a UI may subscribe to, plus display
/// defaults. Enforced by the subject permission guard on WS admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContract {
    pub route: String,
    pub channels: Vec<String>,
    pub default_log_level: DefaultLogLevel,
    pub stream_profile: StreamProfile,
}

/// Declarative plugin metadata. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Reverse-DNS plugin id, e.g. `io.meristem.relay`.
    pub id: PluginId,
    pub version: String,
    pub tier: PluginTier,
    pub runtime_profile: RuntimeProfile,
    /// MAJOR.MINOR string, validated against `SduiVersion::parse`.
    pub sdui_version: String,
    #[serde(default)]
    pub dependencies: BTreeSet<PluginId>,
    /// Relative entry path; must not resolve outside the plugin root.
    pub entry: String,
    pub ui: UiSpec,
    pub ui_contract: UiContract,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    /// Bus subject patterns the plugin subscribes to when started.
    #[serde(default)]
    pub events: BTreeSet<String>,
    /// Capability names the plugin exports to the core.
    #[serde(default)]
    pub exports: BTreeSet<String>,
}

impl PluginManifest {
    pub fn declares(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn exports_capability(&self, name: &str) -> bool {
        self.exports.contains(name)
    }
}
