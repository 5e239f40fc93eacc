use async_trait::async_trait;
use meristem_domain::{
    IntentStatus, InvitationDocument, NodeDocument, NodeId, OrgDocument, OrgId, RoleDocument,
    TaskDocument, TaskId, UserDocument,
};

use crate::cursor::TaskCursor;
use crate::error::StoreError;
use crate::state::{
    AuditFailure, AuditGlobalAnchor, AuditGlobalState, AuditIntent, AuditLog, AuditPartitionState,
};

/// A staged write applied atomically by [`Store::run_transaction`].
///
/// The audit committer stages one batch of these per claim; the task
/// scheduler stages `InsertTask` + `InsertIntent` together. Unique-index
/// violations abort the whole transaction, with one deliberate exception:
/// `InsertAuditLogSwallowDuplicate` keeps the existing row when the
/// `_sequence` or `(partition_id, partition_sequence)` key already exists
/// (crash-retry replay).
#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertTask(TaskDocument),
    InsertIntent(AuditIntent),
    InsertAuditLogSwallowDuplicate(AuditLog),
    CommitIntent { event_id: String, global_sequence: u64, committed_at: i64 },
    UpsertPartitionState(AuditPartitionState),
    UpsertGlobalState(AuditGlobalState),
    InsertAnchor(AuditGlobalAnchor),
    InsertFailure(AuditFailure),
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Collections: `users` (unique username), `roles` (unique (org_id, name)),
/// `orgs`, `invitations` (unique invitation_token).
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    async fn count_users(&self) -> Result<u64, StoreError>;
    async fn insert_user(&self, user: &UserDocument) -> Result<(), StoreError>;
    async fn find_user_by_username(&self, username: &str)
        -> Result<Option<UserDocument>, StoreError>;

    async fn insert_org(&self, org: &OrgDocument) -> Result<(), StoreError>;
    async fn get_org(&self, org_id: &OrgId) -> Result<Option<OrgDocument>, StoreError>;

    async fn insert_role(&self, role: &RoleDocument) -> Result<(), StoreError>;
    async fn find_role(&self, org_id: &OrgId, name: &str)
        -> Result<Option<RoleDocument>, StoreError>;
    async fn update_role(&self, role: &RoleDocument) -> Result<(), StoreError>;

    async fn insert_invitation(&self, invitation: &InvitationDocument) -> Result<(), StoreError>;
    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<InvitationDocument>, StoreError>;
    async fn mark_invitation_accepted(&self, invitation_id: &str) -> Result<(), StoreError>;
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

/// Collection: `tasks` (created_at ascending + unique task_id indexes).
/// Listing is cursor-based only; the caller passes `limit + 1` to probe
/// for a next page.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<TaskDocument>, StoreError>;

    /// Ascending by `(created_at, task_id)`, strictly after `cursor` when
    /// present, org-scoped when `org_id` is present.
    async fn list_tasks(
        &self,
        org_id: Option<&OrgId>,
        after: Option<&TaskCursor>,
        limit: u32,
    ) -> Result<Vec<TaskDocument>, StoreError>;

    async fn update_task(&self, task: &TaskDocument) -> Result<(), StoreError>;
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Collection: `nodes` (unique node_id).
#[async_trait]
pub trait NodeStore: Send + Sync + 'static {
    async fn get_node(&self, node_id: &NodeId) -> Result<Option<NodeDocument>, StoreError>;
    async fn upsert_node(&self, node: &NodeDocument) -> Result<(), StoreError>;

    /// Heartbeat fast-path: create-or-touch the node, refreshing
    /// `last_heartbeat_at`, status and connection status.
    async fn record_heartbeat(
        &self,
        node_id: &NodeId,
        ts: i64,
        claimed_ip: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Nodes whose last heartbeat is strictly older than `cutoff` (or who
    /// never heartbeat at all).
    async fn list_nodes_heartbeat_before(
        &self,
        cutoff: i64,
    ) -> Result<Vec<NodeDocument>, StoreError>;

    async fn mark_offline(&self, node_id: &NodeId) -> Result<(), StoreError>;

    /// Soft reclamation: only applies when the lease is still ACTIVE, so
    /// it is idempotent per generation. Returns whether anything changed.
    async fn reclaim_shadow_lease(&self, node_id: &NodeId, now: i64) -> Result<bool, StoreError>;
}

// ── Plugins ───────────────────────────────────────────────────────────────────

/// Collection: `plugins` (unique plugin_id). Binaries are never stored,
/// only metadata and the committed config version.
#[async_trait]
pub trait PluginStore: Send + Sync + 'static {
    async fn get_plugin(
        &self,
        plugin_id: &meristem_domain::PluginId,
    ) -> Result<Option<crate::state::PluginRecord>, StoreError>;
    async fn upsert_plugin(&self, record: &crate::state::PluginRecord) -> Result<(), StoreError>;
    async fn list_plugins(&self) -> Result<Vec<crate::state::PluginRecord>, StoreError>;
}

// ── Audit ─────────────────────────────────────────────────────────────────────

/// Collections: `audit_intents` (status + created_at), `audit_logs`
/// (unique _sequence, unique (partition_id, partition_sequence)),
/// `audit_partition_state`, `audit_global_anchor`, `audit_failures`,
/// `audit_state`.
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    async fn insert_intent(&self, intent: &AuditIntent) -> Result<(), StoreError>;
    async fn get_intent(&self, event_id: &str) -> Result<Option<AuditIntent>, StoreError>;

    /// Claim up to `batch` intents for `owner`: `pending` and
    /// `failed_retriable` first, sorted `(created_at, event_id)`; if the
    /// batch is short, `processing` intents whose lease expired are taken
    /// over. Claimed rows are CAS'd to `processing` with the new lease.
    async fn claim_intents(
        &self,
        owner: &str,
        batch: u32,
        now: i64,
        lease_ms: u64,
    ) -> Result<Vec<AuditIntent>, StoreError>;

    /// Record a commit failure: bump `attempt_count`, clear the lease,
    /// transition to `failed_retriable` or `failed_terminal`.
    async fn fail_intent(
        &self,
        event_id: &str,
        error: &str,
        terminal: bool,
        now: i64,
    ) -> Result<(), StoreError>;

    /// Authoritative backlog count (statuses counting toward backpressure).
    async fn count_backlog(&self) -> Result<u64, StoreError>;

    async fn count_intents_with_status(&self, status: IntentStatus) -> Result<u64, StoreError>;

    async fn get_partition_state(
        &self,
        partition_id: u32,
    ) -> Result<Option<AuditPartitionState>, StoreError>;
    async fn list_partition_states(&self) -> Result<Vec<AuditPartitionState>, StoreError>;

    async fn get_global_state(&self) -> Result<AuditGlobalState, StoreError>;

    async fn list_logs(&self, partition_id: Option<u32>) -> Result<Vec<AuditLog>, StoreError>;

    async fn latest_anchor(&self) -> Result<Option<AuditGlobalAnchor>, StoreError>;
    async fn list_anchors(&self) -> Result<Vec<AuditGlobalAnchor>, StoreError>;

    async fn list_failures(&self) -> Result<Vec<AuditFailure>, StoreError>;
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// The full persistence contract. The production driver (external
/// document store) lives behind this seam; [`crate::MemoryStore`]
/// implements it for tests and standalone mode.
#[async_trait]
pub trait Store: IdentityStore + TaskStore + NodeStore + PluginStore + AuditStore {
    /// Apply `ops` atomically: either every op lands or none does.
    /// Unique-index violations abort with `TransactionAborted`, except
    /// for the documented swallow on audit log replay.
    async fn run_transaction(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}
