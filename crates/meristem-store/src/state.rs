use meristem_domain::{AuditLevel, IntentStatus, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Audit event input ─────────────────────────────────────────────────────────

/// The caller-facing audit record. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEventInput {
    pub ts: i64,
    pub level: AuditLevel,
    pub node_id: NodeId,
    pub source: String,
    pub trace_id: String,
    pub content: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

// ── Audit intent ──────────────────────────────────────────────────────────────

/// A queued write-behind record sealing the payload with a digest + HMAC
/// so tampering between enqueue and commit is detectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditIntent {
    pub event_id: String,
    pub route_tag: String,
    pub partition_id: u32,
    pub status: IntentStatus,
    pub lease_owner: Option<String>,
    pub lease_until: Option<i64>,
    pub attempt_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub payload: Value,
    pub payload_digest: String,
    pub payload_hmac: String,
    pub hmac_key_id: String,
    pub global_sequence: Option<u64>,
    pub committed_at: Option<i64>,
    pub error_last: Option<String>,
}

// ── Audit log ─────────────────────────────────────────────────────────────────

/// A committed, hash-chained audit record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub event_id: String,
    pub chain_version: u32,
    #[serde(flatten)]
    pub event: AuditEventInput,
    pub partition_id: u32,
    pub partition_sequence: u64,
    pub partition_previous_hash: String,
    pub partition_hash: String,
    #[serde(rename = "_sequence")]
    pub sequence: u64,
    #[serde(rename = "_previous_hash")]
    pub previous_hash: String,
    #[serde(rename = "_hash")]
    pub hash: String,
}

// ── Partition + global tails ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPartitionState {
    pub partition_id: u32,
    pub last_sequence: u64,
    pub last_hash: String,
    pub updated_at: i64,
}

/// The single global tail row (`audit_state` collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditGlobalState {
    pub last_sequence: u64,
    pub last_hash: String,
    pub updated_at: i64,
}

impl Default for AuditGlobalState {
    fn default() -> Self {
        Self { last_sequence: 0, last_hash: String::new(), updated_at: 0 }
    }
}

// ── Anchors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionHead {
    pub partition_id: u32,
    pub last_sequence: u64,
    pub last_hash: String,
}

/// Periodic tamper-evident checkpoint covering every partition tail,
/// chained to the previous anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditGlobalAnchor {
    pub anchor_id: String,
    pub ts: i64,
    pub partition_heads: Vec<PartitionHead>,
    pub previous_anchor_hash: String,
    pub anchor_hash: String,
}

// ── Plugins ───────────────────────────────────────────────────────────────────

/// Installed-plugin record (`plugins` collection). `config_version`
/// increases only on a successful reload commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub plugin_id: meristem_domain::PluginId,
    pub version: String,
    pub config_version: u64,
    pub config: Value,
    pub installed_at: i64,
    pub updated_at: i64,
}

// ── Failures ──────────────────────────────────────────────────────────────────

/// Terminal intent failure, kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFailure {
    pub event_id: String,
    pub partition_id: u32,
    pub reason: String,
    pub attempt_count: u32,
    pub failed_at: i64,
    pub payload: Value,
}
