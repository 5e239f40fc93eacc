use std::sync::Arc;

use meristem_audit::{AuditPipeline, RecordOutcome};
use meristem_domain::{
    now_ms, AuditLevel, DomainError, ErrorCode, NodeId, OrgId, TaskDocument, TaskId, TaskLease,
    TaskStatus, TraceContext,
};
use meristem_store::{AuditEventInput, Store, TaskCursor, TaskStore, WriteOp};
use serde_json::{json, Map, Value};
use tracing::warn;

/// Caller identity resolved by the auth layer.
#[derive(Debug, Clone)]
pub struct ActorIdentity {
    pub user_id: String,
    pub org_id: Option<OrgId>,
    pub superadmin: bool,
}

#[derive(Debug, Clone)]
pub struct TaskServiceConfig {
    pub max_call_depth: i64,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
}

impl Default for TaskServiceConfig {
    fn default() -> Self {
        Self { max_call_depth: 8, default_list_limit: 50, max_list_limit: 200 }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub call_depth: Option<i64>,
    pub target_node_id: NodeId,
    pub task_type: String,
    pub plugin_id: String,
    pub action: String,
    pub params: Value,
    pub volatile: bool,
    pub lease: TaskLease,
    pub progress: Value,
    pub result_uri: Option<String>,
    pub handshake: Value,
}

#[derive(Debug)]
pub struct TaskPage {
    pub tasks: Vec<TaskDocument>,
    pub has_next: bool,
    pub next_cursor: Option<String>,
}

/// Task creation and cursor-paginated listing. When the audit pipeline is
/// ready, the task insert and its audit intent share one transaction;
/// otherwise the audit is written inline best-effort.
pub struct TaskService {
    store: Arc<dyn Store>,
    pipeline: Arc<AuditPipeline>,
    config: TaskServiceConfig,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<AuditPipeline>,
        config: TaskServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self { store, pipeline, config })
    }

    pub async fn create(
        &self,
        ctx: &TraceContext,
        actor: &ActorIdentity,
        request: CreateTaskRequest,
    ) -> Result<TaskDocument, DomainError> {
        let call_depth = request.call_depth.unwrap_or(0);
        if call_depth < 0 || call_depth > self.config.max_call_depth {
            return Err(DomainError::new(ErrorCode::InvalidCallDepth)
                .with_meta("call_depth", call_depth));
        }

        let org_id = match (&actor.org_id, actor.superadmin) {
            (Some(org), _) => org.clone(),
            (None, true) => OrgId::new("system"),
            (None, false) => return Err(DomainError::new(ErrorCode::Unauthorized)),
        };

        let task = TaskDocument {
            task_id: TaskId::generate(),
            owner_id: actor.user_id.clone(),
            org_id,
            trace_id: ctx.trace_id.clone(),
            target_node_id: request.target_node_id.clone(),
            task_type: request.task_type,
            status: TaskStatus::Created,
            availability: "pending".to_string(),
            payload: json!({
                "plugin_id": request.plugin_id,
                "action": request.action,
                "params": request.params,
                "volatile": request.volatile,
            }),
            lease: request.lease,
            progress: request.progress,
            result_uri: request.result_uri,
            handshake: request.handshake,
            created_at: now_ms(),
        };

        let mut meta = Map::new();
        meta.insert("task_id".to_string(), json!(task.task_id.as_str()));
        meta.insert("target_node_id".to_string(), json!(task.target_node_id.as_str()));
        meta.insert("actor".to_string(), json!(actor.user_id));
        let audit = AuditEventInput {
            ts: task.created_at,
            level: AuditLevel::Info,
            node_id: ctx.node_id.clone(),
            source: "task.create".to_string(),
            trace_id: ctx.trace_id.clone(),
            content: format!("task {} created", task.task_id),
            meta,
        };

        if self.pipeline.is_ready() {
            // Two-phase path: backpressure gate, then one transaction for
            // the business write and the sealed intent.
            if self
                .pipeline
                .over_backpressure_limit()
                .await
                .map_err(|e| DomainError::internal(e.to_string()))?
            {
                return Err(DomainError::new(ErrorCode::AuditBackpressure)
                    .with_meta("retry_after_seconds", 1));
            }
            let intent = self
                .pipeline
                .build_intent(&audit)
                .map_err(|e| DomainError::internal(e.to_string()))?;
            self.store
                .run_transaction(vec![
                    WriteOp::InsertTask(task.clone()),
                    WriteOp::InsertIntent(intent),
                ])
                .await
                .map_err(|e| {
                    DomainError::new(ErrorCode::TaskCreationFailed).with_cause(e)
                })?;
            self.pipeline.note_enqueued();
        } else {
            self.store
                .run_transaction(vec![WriteOp::InsertTask(task.clone())])
                .await
                .map_err(|e| {
                    DomainError::new(ErrorCode::TaskCreationFailed).with_cause(e)
                })?;
            // Inline best-effort audit; failure never fails the create.
            match self.pipeline.record(&audit).await {
                Ok(RecordOutcome::Committed(_)) | Ok(RecordOutcome::Queued { .. }) => {}
                Ok(RecordOutcome::Backpressure { .. }) => {
                    warn!(task_id = %task.task_id, "inline audit hit backpressure");
                }
                Err(e) => warn!(task_id = %task.task_id, error = %e, "inline audit failed"),
            }
        }

        Ok(task)
    }

    /// Record an agent's result for a task: terminal status, result URI,
    /// final progress.
    pub async fn submit_result(
        &self,
        actor: &ActorIdentity,
        task_id: &TaskId,
        succeeded: bool,
        result_uri: Option<String>,
        progress: Option<Value>,
    ) -> Result<TaskDocument, DomainError> {
        let Some(mut task) = self
            .store
            .get_task(task_id)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))?
        else {
            return Err(DomainError::new(ErrorCode::TaskNotFound));
        };
        if !actor.superadmin && actor.org_id.as_ref() != Some(&task.org_id) {
            return Err(DomainError::new(ErrorCode::AccessDenied));
        }

        task.status = if succeeded { TaskStatus::Succeeded } else { TaskStatus::Failed };
        if let Some(uri) = result_uri {
            task.result_uri = Some(uri);
        }
        if let Some(progress) = progress {
            task.progress = progress;
        }
        self.store
            .update_task(&task)
            .await
            .map_err(|e| DomainError::new(ErrorCode::ResultSubmissionFailed).with_cause(e))?;
        Ok(task)
    }

    pub async fn list(
        &self,
        actor: &ActorIdentity,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<TaskPage, DomainError> {
        let limit = limit
            .unwrap_or(self.config.default_list_limit)
            .clamp(1, self.config.max_list_limit);

        let after = match cursor {
            Some(raw) => Some(
                TaskCursor::decode(raw)
                    .map_err(|_| DomainError::new(ErrorCode::InvalidCursor))?,
            ),
            None => None,
        };

        let org_scope = if actor.superadmin {
            None
        } else {
            match &actor.org_id {
                Some(org) => Some(org.clone()),
                None => return Err(DomainError::new(ErrorCode::Unauthorized)),
            }
        };

        // limit + 1 probe: the extra row only signals another page.
        let mut tasks = self
            .store
            .list_tasks(org_scope.as_ref(), after.as_ref(), limit + 1)
            .await
            .map_err(|e| DomainError::internal(e.to_string()))?;

        let has_next = tasks.len() as u32 > limit;
        tasks.truncate(limit as usize);
        let next_cursor = if has_next {
            tasks.last().map(|t| {
                TaskCursor { created_at: t.created_at, task_id: t.task_id.clone() }.encode()
            })
        } else {
            None
        };

        Ok(TaskPage { tasks, has_next, next_cursor })
    }
}
