use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meristem_domain::{
    ConnectionStatus, IntentStatus, InvitationDocument, NodeDocument, NodeId, NodeStatus,
    OrgDocument, OrgId, ReclaimStatus, RoleDocument, TaskDocument, TaskId, UserDocument,
};
use tokio::sync::RwLock;

use crate::cursor::TaskCursor;
use crate::error::StoreError;
use crate::state::{
    AuditFailure, AuditGlobalAnchor, AuditGlobalState, AuditIntent, AuditLog, AuditPartitionState,
    PluginRecord,
};
use crate::store::{AuditStore, IdentityStore, NodeStore, PluginStore, Store, TaskStore, WriteOp};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, UserDocument>,
    orgs: HashMap<OrgId, OrgDocument>,
    roles: HashMap<String, RoleDocument>,
    invitations: HashMap<String, InvitationDocument>,
    tasks: HashMap<TaskId, TaskDocument>,
    nodes: HashMap<NodeId, NodeDocument>,
    plugins: HashMap<meristem_domain::PluginId, PluginRecord>,
    intents: HashMap<String, AuditIntent>,
    logs: Vec<AuditLog>,
    partition_state: HashMap<u32, AuditPartitionState>,
    global_state: AuditGlobalState,
    anchors: Vec<AuditGlobalAnchor>,
    failures: Vec<AuditFailure>,
}

impl Inner {
    fn username_taken(&self, username: &str) -> bool {
        self.users.values().any(|u| u.username == username)
    }

    fn role_name_taken(&self, org_id: &OrgId, name: &str) -> bool {
        self.roles.values().any(|r| &r.org_id == org_id && r.name == name)
    }

    fn invitation_token_taken(&self, token: &str) -> bool {
        self.invitations.values().any(|i| i.invitation_token == token)
    }

    fn log_key_taken(&self, log: &AuditLog) -> bool {
        self.logs.iter().any(|l| {
            l.sequence == log.sequence
                || (l.partition_id == log.partition_id
                    && l.partition_sequence == log.partition_sequence)
        })
    }

    /// Pre-validate a staged batch against the unique indexes, so apply
    /// never has to roll back.
    fn check_ops(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        for op in ops {
            match op {
                WriteOp::InsertTask(task) => {
                    if self.tasks.contains_key(&task.task_id) {
                        return Err(StoreError::TransactionAborted(format!(
                            "duplicate task_id '{}'",
                            task.task_id
                        )));
                    }
                }
                WriteOp::InsertIntent(intent) => {
                    if self.intents.contains_key(&intent.event_id) {
                        return Err(StoreError::TransactionAborted(format!(
                            "duplicate intent event_id '{}'",
                            intent.event_id
                        )));
                    }
                }
                WriteOp::CommitIntent { event_id, .. } => {
                    if !self.intents.contains_key(event_id) {
                        return Err(StoreError::TransactionAborted(format!(
                            "unknown intent '{}'",
                            event_id
                        )));
                    }
                }
                // Swallow-on-duplicate by design; never aborts.
                WriteOp::InsertAuditLogSwallowDuplicate(_) => {}
                WriteOp::UpsertPartitionState(_)
                | WriteOp::UpsertGlobalState(_)
                | WriteOp::InsertAnchor(_)
                | WriteOp::InsertFailure(_) => {}
            }
        }
        Ok(())
    }

    fn apply_ops(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::InsertTask(task) => {
                    self.tasks.insert(task.task_id.clone(), task);
                }
                WriteOp::InsertIntent(intent) => {
                    self.intents.insert(intent.event_id.clone(), intent);
                }
                WriteOp::InsertAuditLogSwallowDuplicate(log) => {
                    if !self.log_key_taken(&log) {
                        self.logs.push(log);
                    }
                }
                WriteOp::CommitIntent { event_id, global_sequence, committed_at } => {
                    if let Some(intent) = self.intents.get_mut(&event_id) {
                        intent.status = IntentStatus::Committed;
                        intent.global_sequence = Some(global_sequence);
                        intent.committed_at = Some(committed_at);
                        intent.lease_owner = None;
                        intent.lease_until = None;
                        intent.updated_at = committed_at;
                    }
                }
                WriteOp::UpsertPartitionState(state) => {
                    self.partition_state.insert(state.partition_id, state);
                }
                WriteOp::UpsertGlobalState(state) => {
                    self.global_state = state;
                }
                WriteOp::InsertAnchor(anchor) => {
                    self.anchors.push(anchor);
                }
                WriteOp::InsertFailure(failure) => {
                    self.failures.push(failure);
                }
            }
        }
    }
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Backs tests and standalone runtime
/// mode; the external document store lives behind the same traits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.users.len() as u64)
    }

    async fn insert_user(&self, user: &UserDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.username_taken(&user.username) {
            return Err(StoreError::DuplicateKey { index: "users.username".to_string() });
        }
        guard.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserDocument>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.users.values().find(|u| u.username == username).cloned())
    }

    async fn insert_org(&self, org: &OrgDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.orgs.insert(org.org_id.clone(), org.clone());
        Ok(())
    }

    async fn get_org(&self, org_id: &OrgId) -> Result<Option<OrgDocument>, StoreError> {
        Ok(self.inner.read().await.orgs.get(org_id).cloned())
    }

    async fn insert_role(&self, role: &RoleDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.role_name_taken(&role.org_id, &role.name) {
            return Err(StoreError::DuplicateKey { index: "roles.org_id_name".to_string() });
        }
        guard.roles.insert(role.role_id.clone(), role.clone());
        Ok(())
    }

    async fn find_role(
        &self,
        org_id: &OrgId,
        name: &str,
    ) -> Result<Option<RoleDocument>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.roles.values().find(|r| &r.org_id == org_id && r.name == name).cloned())
    }

    async fn update_role(&self, role: &RoleDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.roles.contains_key(&role.role_id) {
            return Err(StoreError::NotFound(format!("role '{}'", role.role_id)));
        }
        guard.roles.insert(role.role_id.clone(), role.clone());
        Ok(())
    }

    async fn insert_invitation(&self, invitation: &InvitationDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.invitation_token_taken(&invitation.invitation_token) {
            return Err(StoreError::DuplicateKey {
                index: "invitations.invitation_token".to_string(),
            });
        }
        guard.invitations.insert(invitation.invitation_id.clone(), invitation.clone());
        Ok(())
    }

    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<InvitationDocument>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.invitations.values().find(|i| i.invitation_token == token).cloned())
    }

    async fn mark_invitation_accepted(&self, invitation_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let invitation = guard
            .invitations
            .get_mut(invitation_id)
            .ok_or_else(|| StoreError::NotFound(format!("invitation '{}'", invitation_id)))?;
        invitation.accepted = true;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<TaskDocument>, StoreError> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    async fn list_tasks(
        &self,
        org_id: Option<&OrgId>,
        after: Option<&TaskCursor>,
        limit: u32,
    ) -> Result<Vec<TaskDocument>, StoreError> {
        let guard = self.inner.read().await;
        let mut tasks: Vec<TaskDocument> = guard
            .tasks
            .values()
            .filter(|t| org_id.map_or(true, |org| &t.org_id == org))
            .filter(|t| {
                after.map_or(true, |c| {
                    (t.created_at, &t.task_id) > (c.created_at, &c.task_id)
                })
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| (a.created_at, &a.task_id).cmp(&(b.created_at, &b.task_id)));
        tasks.truncate(limit as usize);
        Ok(tasks)
    }

    async fn update_task(&self, task: &TaskDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.tasks.contains_key(&task.task_id) {
            return Err(StoreError::NotFound(format!("task '{}'", task.task_id)));
        }
        guard.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_node(&self, node_id: &NodeId) -> Result<Option<NodeDocument>, StoreError> {
        Ok(self.inner.read().await.nodes.get(node_id).cloned())
    }

    async fn upsert_node(&self, node: &NodeDocument) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.nodes.insert(node.node_id.clone(), node.clone());
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        node_id: &NodeId,
        ts: i64,
        claimed_ip: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .entry(node_id.clone())
            .or_insert_with(|| NodeDocument::new(node_id.clone(), ts));
        node.last_heartbeat_at = Some(ts);
        node.status = NodeStatus::Online;
        node.connection_status = ConnectionStatus::Connected;
        if let Some(ip) = claimed_ip {
            node.claimed_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn list_nodes_heartbeat_before(
        &self,
        cutoff: i64,
    ) -> Result<Vec<NodeDocument>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .nodes
            .values()
            .filter(|n| n.last_heartbeat_at.map_or(true, |ts| ts < cutoff))
            .cloned()
            .collect())
    }

    async fn mark_offline(&self, node_id: &NodeId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NotFound(format!("node '{}'", node_id)))?;
        node.status = NodeStatus::Offline;
        Ok(())
    }

    async fn reclaim_shadow_lease(&self, node_id: &NodeId, now: i64) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        let node = guard
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NotFound(format!("node '{}'", node_id)))?;
        if node.ip_shadow_lease.reclaim_status != ReclaimStatus::Active {
            return Ok(false);
        }
        node.connection_status = ConnectionStatus::ExpiredCredentials;
        node.ip_shadow_lease.reclaim_status = ReclaimStatus::Reclaimed;
        node.ip_shadow_lease.reclaim_at = Some(now);
        node.ip_shadow_lease.reclaim_generation += 1;
        Ok(true)
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn get_plugin(
        &self,
        plugin_id: &meristem_domain::PluginId,
    ) -> Result<Option<PluginRecord>, StoreError> {
        Ok(self.inner.read().await.plugins.get(plugin_id).cloned())
    }

    async fn upsert_plugin(&self, record: &PluginRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.plugins.insert(record.plugin_id.clone(), record.clone());
        Ok(())
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut records: Vec<PluginRecord> = guard.plugins.values().cloned().collect();
        records.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        Ok(records)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_intent(&self, intent: &AuditIntent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.intents.contains_key(&intent.event_id) {
            return Err(StoreError::DuplicateKey { index: "audit_intents.event_id".to_string() });
        }
        guard.intents.insert(intent.event_id.clone(), intent.clone());
        Ok(())
    }

    async fn get_intent(&self, event_id: &str) -> Result<Option<AuditIntent>, StoreError> {
        Ok(self.inner.read().await.intents.get(event_id).cloned())
    }

    async fn claim_intents(
        &self,
        owner: &str,
        batch: u32,
        now: i64,
        lease_ms: u64,
    ) -> Result<Vec<AuditIntent>, StoreError> {
        let mut guard = self.inner.write().await;
        let batch = batch as usize;

        let mut ready: Vec<(i64, String)> = guard
            .intents
            .values()
            .filter(|i| {
                matches!(i.status, IntentStatus::Pending | IntentStatus::FailedRetriable)
            })
            .map(|i| (i.created_at, i.event_id.clone()))
            .collect();
        ready.sort();
        let mut candidates: Vec<String> =
            ready.into_iter().take(batch).map(|(_, id)| id).collect();

        // Lease takeover when the batch is short.
        if candidates.len() < batch {
            let mut expired: Vec<(i64, String)> = guard
                .intents
                .values()
                .filter(|i| {
                    i.status == IntentStatus::Processing
                        && i.lease_until.is_some_and(|until| until <= now)
                })
                .map(|i| (i.created_at, i.event_id.clone()))
                .collect();
            expired.sort();
            for (_, id) in expired.into_iter().take(batch - candidates.len()) {
                candidates.push(id);
            }
        }

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(intent) = guard.intents.get_mut(&id) {
                intent.status = IntentStatus::Processing;
                intent.lease_owner = Some(owner.to_string());
                intent.lease_until = Some(now + lease_ms as i64);
                intent.updated_at = now;
                claimed.push(intent.clone());
            }
        }
        Ok(claimed)
    }

    async fn fail_intent(
        &self,
        event_id: &str,
        error: &str,
        terminal: bool,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let intent = guard
            .intents
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound(format!("intent '{}'", event_id)))?;
        intent.attempt_count += 1;
        intent.error_last = Some(error.to_string());
        intent.lease_owner = None;
        intent.lease_until = None;
        intent.updated_at = now;
        intent.status =
            if terminal { IntentStatus::FailedTerminal } else { IntentStatus::FailedRetriable };
        Ok(())
    }

    async fn count_backlog(&self) -> Result<u64, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.intents.values().filter(|i| i.status.counts_toward_backlog()).count() as u64)
    }

    async fn count_intents_with_status(&self, status: IntentStatus) -> Result<u64, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.intents.values().filter(|i| i.status == status).count() as u64)
    }

    async fn get_partition_state(
        &self,
        partition_id: u32,
    ) -> Result<Option<AuditPartitionState>, StoreError> {
        Ok(self.inner.read().await.partition_state.get(&partition_id).cloned())
    }

    async fn list_partition_states(&self) -> Result<Vec<AuditPartitionState>, StoreError> {
        let guard = self.inner.read().await;
        let mut states: Vec<AuditPartitionState> = guard.partition_state.values().cloned().collect();
        states.sort_by_key(|s| s.partition_id);
        Ok(states)
    }

    async fn get_global_state(&self) -> Result<AuditGlobalState, StoreError> {
        Ok(self.inner.read().await.global_state.clone())
    }

    async fn list_logs(&self, partition_id: Option<u32>) -> Result<Vec<AuditLog>, StoreError> {
        let guard = self.inner.read().await;
        let mut logs: Vec<AuditLog> = guard
            .logs
            .iter()
            .filter(|l| partition_id.map_or(true, |p| l.partition_id == p))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.sequence);
        Ok(logs)
    }

    async fn latest_anchor(&self) -> Result<Option<AuditGlobalAnchor>, StoreError> {
        Ok(self.inner.read().await.anchors.last().cloned())
    }

    async fn list_anchors(&self) -> Result<Vec<AuditGlobalAnchor>, StoreError> {
        Ok(self.inner.read().await.anchors.clone())
    }

    async fn list_failures(&self) -> Result<Vec<AuditFailure>, StoreError> {
        Ok(self.inner.read().await.failures.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn run_transaction(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.check_ops(&ops)?;
        guard.apply_ops(ops);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meristem_domain::{now_ms, TaskLease, TaskStatus};
    use serde_json::json;

    fn dummy_task(id: &str, org: &str, created_at: i64) -> TaskDocument {
        TaskDocument {
            task_id: TaskId::new(id),
            owner_id: "u1".to_string(),
            org_id: OrgId::new(org),
            trace_id: "tr".to_string(),
            target_node_id: NodeId::new("n1"),
            task_type: "cmd".to_string(),
            status: TaskStatus::Created,
            availability: "any".to_string(),
            payload: json!({}),
            lease: TaskLease { expire_at: created_at + 60_000, heartbeat_interval: 5_000 },
            progress: json!(null),
            result_uri: None,
            handshake: json!(null),
            created_at,
        }
    }

    fn dummy_intent(event_id: &str, created_at: i64) -> AuditIntent {
        AuditIntent {
            event_id: event_id.to_string(),
            route_tag: "task.create".to_string(),
            partition_id: 0,
            status: IntentStatus::Pending,
            lease_owner: None,
            lease_until: None,
            attempt_count: 0,
            created_at,
            updated_at: created_at,
            payload: json!({"content": event_id}),
            payload_digest: "d".to_string(),
            payload_hmac: "h".to_string(),
            hmac_key_id: "k1".to_string(),
            global_sequence: None,
            committed_at: None,
            error_last: None,
        }
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let store = MemoryStore::new();
        let user = UserDocument {
            user_id: "u1".to_string(),
            username: "admin".to_string(),
            password_hash: "x".to_string(),
            org_id: None,
            role: "superadmin".to_string(),
            superadmin: true,
            created_at: now_ms(),
        };
        store.insert_user(&user).await.unwrap();
        let mut dup = user.clone();
        dup.user_id = "u2".to_string();
        assert!(matches!(
            store.insert_user(&dup).await,
            Err(StoreError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn task_list_is_cursor_ordered() {
        let store = MemoryStore::new();
        for (i, id) in ["c", "a", "b"].iter().enumerate() {
            store
                .run_transaction(vec![WriteOp::InsertTask(dummy_task(id, "org", 100 + i as i64))])
                .await
                .unwrap();
        }
        let page = store.list_tasks(Some(&OrgId::new("org")), None, 10).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]); // created_at ascending

        let cursor = TaskCursor { created_at: page[0].created_at, task_id: page[0].task_id.clone() };
        let rest = store.list_tasks(Some(&OrgId::new("org")), Some(&cursor), 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].task_id.as_str(), "a");
    }

    #[tokio::test]
    async fn transaction_is_atomic_on_duplicate_task() {
        let store = MemoryStore::new();
        store
            .run_transaction(vec![WriteOp::InsertTask(dummy_task("t1", "org", 1))])
            .await
            .unwrap();

        // A batch with a duplicate task must not leave its intent behind.
        let result = store
            .run_transaction(vec![
                WriteOp::InsertIntent(dummy_intent("e1", 1)),
                WriteOp::InsertTask(dummy_task("t1", "org", 2)),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::TransactionAborted(_))));
        assert!(store.get_intent("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_orders_by_created_at_then_event_id() {
        let store = MemoryStore::new();
        store.insert_intent(&dummy_intent("b", 100)).await.unwrap();
        store.insert_intent(&dummy_intent("a", 100)).await.unwrap();
        store.insert_intent(&dummy_intent("c", 50)).await.unwrap();

        let claimed = store.claim_intents("node-1", 2, 1_000, 30_000).await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|i| i.event_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        for intent in &claimed {
            assert_eq!(intent.status, IntentStatus::Processing);
            assert_eq!(intent.lease_owner.as_deref(), Some("node-1"));
        }
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let store = MemoryStore::new();
        store.insert_intent(&dummy_intent("stuck", 10)).await.unwrap();
        // First claim holds the lease until t=30_010.
        store.claim_intents("node-1", 8, 10, 30_000).await.unwrap();

        // Before expiry nothing is claimable.
        let none = store.claim_intents("node-2", 8, 20_000, 30_000).await.unwrap();
        assert!(none.is_empty());

        // After expiry the second worker takes it over.
        let taken = store.claim_intents("node-2", 8, 40_000, 30_000).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].lease_owner.as_deref(), Some("node-2"));
    }

    #[tokio::test]
    async fn fail_intent_counts_attempts() {
        let store = MemoryStore::new();
        store.insert_intent(&dummy_intent("e1", 1)).await.unwrap();
        store.fail_intent("e1", "boom", false, 5).await.unwrap();
        let intent = store.get_intent("e1").await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::FailedRetriable);
        assert_eq!(intent.attempt_count, 1);
        assert!(intent.lease_owner.is_none());

        store.fail_intent("e1", "boom again", true, 6).await.unwrap();
        let intent = store.get_intent("e1").await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::FailedTerminal);
        assert_eq!(intent.attempt_count, 2);
    }

    #[tokio::test]
    async fn reclaim_is_idempotent_per_generation() {
        let store = MemoryStore::new();
        store.record_heartbeat(&NodeId::new("n1"), 100, Some("10.0.0.1")).await.unwrap();

        assert!(store.reclaim_shadow_lease(&NodeId::new("n1"), 200).await.unwrap());
        let node = store.get_node(&NodeId::new("n1")).await.unwrap().unwrap();
        assert_eq!(node.ip_shadow_lease.reclaim_status, ReclaimStatus::Reclaimed);
        assert_eq!(node.ip_shadow_lease.reclaim_generation, 1);
        assert_eq!(node.connection_status, ConnectionStatus::ExpiredCredentials);

        // Second reclaim of the same generation is a no-op.
        assert!(!store.reclaim_shadow_lease(&NodeId::new("n1"), 300).await.unwrap());
        let node = store.get_node(&NodeId::new("n1")).await.unwrap().unwrap();
        assert_eq!(node.ip_shadow_lease.reclaim_generation, 1);
        assert_eq!(node.ip_shadow_lease.reclaim_at, Some(200));
    }

    #[tokio::test]
    async fn audit_log_duplicate_is_swallowed() {
        let store = MemoryStore::new();
        let log = AuditLog {
            event_id: "e1".to_string(),
            chain_version: 1,
            event: AuditEventInputFixture::make(),
            partition_id: 0,
            partition_sequence: 1,
            partition_previous_hash: String::new(),
            partition_hash: "p1".to_string(),
            sequence: 1,
            previous_hash: String::new(),
            hash: "g1".to_string(),
        };
        store
            .run_transaction(vec![WriteOp::InsertAuditLogSwallowDuplicate(log.clone())])
            .await
            .unwrap();
        // Replay after crash: same keys, must not error or duplicate.
        store
            .run_transaction(vec![WriteOp::InsertAuditLogSwallowDuplicate(log)])
            .await
            .unwrap();
        assert_eq!(store.list_logs(None).await.unwrap().len(), 1);
    }

    struct AuditEventInputFixture;
    impl AuditEventInputFixture {
        fn make() -> crate::state::AuditEventInput {
            crate::state::AuditEventInput {
                ts: 1,
                level: meristem_domain::AuditLevel::Info,
                node_id: NodeId::new("n1"),
                source: "test".to_string(),
                trace_id: "tr".to_string(),
                content: "hello".to_string(),
                meta: Default::default(),
            }
        }
    }
}
