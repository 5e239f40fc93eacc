use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permission::PermissionSet;
use crate::types::{ConnectionStatus, NodeId, NodeStatus, OrgId, ReclaimStatus, TaskId, TaskStatus};

// ── Tasks ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLease {
    /// Epoch-ms after which the lease is considered expired.
    pub expire_at: i64,
    /// Interval in ms at which the agent must heartbeat the lease.
    pub heartbeat_interval: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    pub task_id: TaskId,
    pub owner_id: String,
    pub org_id: OrgId,
    pub trace_id: String,
    pub target_node_id: NodeId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub availability: String,
    pub payload: Value,
    pub lease: TaskLease,
    pub progress: Value,
    pub result_uri: Option<String>,
    pub handshake: Value,
    pub created_at: i64,
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Soft-reclamation state for a node's shadow IP lease. Idempotent per
/// `reclaim_generation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpShadowLease {
    pub reclaim_status: ReclaimStatus,
    pub reclaim_at: Option<i64>,
    pub reclaim_generation: u64,
}

impl Default for IpShadowLease {
    fn default() -> Self {
        Self { reclaim_status: ReclaimStatus::Active, reclaim_at: None, reclaim_generation: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub node_id: NodeId,
    pub persona: Option<String>,
    pub status: NodeStatus,
    pub connection_status: ConnectionStatus,
    pub claimed_ip: Option<String>,
    pub last_heartbeat_at: Option<i64>,
    #[serde(default)]
    pub ip_shadow_lease: IpShadowLease,
    pub created_at: i64,
}

impl NodeDocument {
    pub fn new(node_id: NodeId, now: i64) -> Self {
        Self {
            node_id,
            persona: None,
            status: NodeStatus::Online,
            connection_status: ConnectionStatus::Connected,
            claimed_ip: None,
            last_heartbeat_at: Some(now),
            ip_shadow_lease: IpShadowLease::default(),
            created_at: now,
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    pub user_id: String,
    pub username: String,
    /// Salted hash, never the cleartext.
    pub password_hash: String,
    pub org_id: Option<OrgId>,
    pub role: String,
    pub superadmin: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDocument {
    pub role_id: String,
    pub org_id: OrgId,
    pub name: String,
    pub permissions: PermissionSet,
    /// Builtin roles are seeded at bootstrap and read-only afterwards.
    pub builtin: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDocument {
    pub org_id: OrgId,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationDocument {
    pub invitation_id: String,
    pub invitation_token: String,
    pub org_id: OrgId,
    pub role: String,
    pub accepted: bool,
    pub expires_at: i64,
    pub created_at: i64,
}
