use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use meristem_control::{ActorIdentity, CreateTaskRequest};
use meristem_domain::{
    now_ms, ErrorCode, InvitationDocument, NodeId, OrgDocument, OrgId, PermissionSet,
    RoleDocument, TaskLease, TraceContext, UserDocument,
};
use meristem_store::IdentityStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, AuthContext};
use crate::error::ApiError;
use crate::state::AppState;

const BUILTIN_ROLES: &[(&str, &[&str])] = &[
    ("admin", &["*"]),
    ("operator", &["node:*", "plugin:access"]),
    ("viewer", &["node:read"]),
];

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.count_users().await?;
    Ok(StatusCode::OK)
}

// ── Bootstrap & login ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BootstrapBody {
    pub bootstrap_token: String,
    pub username: String,
    pub password: String,
}

/// One-shot superadmin creation on an empty store.
pub async fn bootstrap(
    State(state): State<AppState>,
    Json(body): Json<BootstrapBody>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.count_users().await? > 0 {
        return Err(ApiError::code(ErrorCode::BootstrapAlreadyCompleted));
    }
    if body.bootstrap_token.is_empty() || body.bootstrap_token != *state.bootstrap_token {
        return Err(ApiError::code(ErrorCode::InvalidBootstrapToken));
    }

    let now = now_ms();
    let org = OrgDocument { org_id: OrgId::new("root"), name: "root".to_string(), created_at: now };
    state.store.insert_org(&org).await?;

    for (name, grants) in BUILTIN_ROLES {
        state
            .store
            .insert_role(&RoleDocument {
                role_id: Uuid::new_v4().to_string(),
                org_id: org.org_id.clone(),
                name: name.to_string(),
                permissions: PermissionSet::from_iter(grants.iter().copied()),
                builtin: true,
                created_at: now,
            })
            .await?;
    }

    let user = UserDocument {
        user_id: Uuid::new_v4().to_string(),
        username: body.username,
        password_hash: hash_password(&body.password),
        org_id: Some(org.org_id),
        role: "admin".to_string(),
        superadmin: true,
        created_at: now,
    };
    state.store.insert_user(&user).await?;
    info!(username = %user.username, "bootstrap completed");

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "user_id": user.user_id }))))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .store
        .find_user_by_username(&body.username)
        .await?
        .filter(|user| verify_password(&body.password, &user.password_hash));
    let Some(user) = user else {
        state.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
        return Err(ApiError::code(ErrorCode::AuthInvalidCredentials));
    };

    let permissions = resolve_permissions(&state, &user).await?;
    let access_token = state.auth.issue(&user, permissions)?;
    Ok(Json(json!({ "success": true, "access_token": access_token })))
}

async fn resolve_permissions(
    state: &AppState,
    user: &UserDocument,
) -> Result<Vec<String>, ApiError> {
    if user.superadmin {
        return Ok(vec!["*".to_string()]);
    }
    let Some(org_id) = &user.org_id else {
        return Ok(Vec::new());
    };
    let role = state.store.find_role(org_id, &user.role).await?;
    Ok(role.map(|r| r.permissions.0.into_iter().collect()).unwrap_or_default())
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    pub target_node_id: String,
    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,
    pub plugin_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub volatile: bool,
    pub lease: Option<TaskLease>,
    #[serde(default)]
    pub progress: Value,
    #[serde(default)]
    pub result_uri: Option<String>,
    #[serde(default)]
    pub handshake: Value,
}

fn default_task_type() -> String {
    "command".to_string()
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let call_depth = match headers.get("x-call-depth") {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| ApiError::code(ErrorCode::InvalidCallDepth))?,
        ),
    };

    let ctx = TraceContext::new_root(state.node_id.clone(), "task.create");
    let actor = ActorIdentity {
        user_id: auth.user_id.clone(),
        org_id: auth.org_id.clone(),
        superadmin: auth.superadmin,
    };
    let request = CreateTaskRequest {
        call_depth,
        target_node_id: NodeId::new(body.target_node_id),
        task_type: body.task_type,
        plugin_id: body.plugin_id,
        action: body.action,
        params: body.params,
        volatile: body.volatile,
        lease: body.lease.unwrap_or(TaskLease {
            expire_at: now_ms() + 300_000,
            heartbeat_interval: 15_000,
        }),
        progress: body.progress,
        result_uri: body.result_uri,
        handshake: body.handshake,
    };

    let task = state.tasks.create(&ctx, &actor, request).await?;
    state.metrics.tasks_created.fetch_add(1, Ordering::Relaxed);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "task_id": task.task_id, "trace_id": task.trace_id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResultBody {
    pub succeeded: bool,
    #[serde(default)]
    pub result_uri: Option<String>,
    #[serde(default)]
    pub progress: Option<Value>,
}

pub async fn submit_task_result(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::extract::Path(task_id): axum::extract::Path<String>,
    Json(body): Json<SubmitResultBody>,
) -> Result<Json<Value>, ApiError> {
    let actor = ActorIdentity {
        user_id: auth.user_id.clone(),
        org_id: auth.org_id.clone(),
        superadmin: auth.superadmin,
    };
    let task = state
        .tasks
        .submit_result(
            &actor,
            &meristem_domain::TaskId::new(task_id),
            body.succeeded,
            body.result_uri,
            body.progress,
        )
        .await?;
    Ok(Json(json!({ "success": true, "task_id": task.task_id, "status": task.status })))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let actor = ActorIdentity {
        user_id: auth.user_id.clone(),
        org_id: auth.org_id.clone(),
        superadmin: auth.superadmin,
    };
    let page = state.tasks.list(&actor, query.limit, query.cursor.as_deref()).await?;
    Ok(Json(json!({
        "success": true,
        "tasks": page.tasks,
        "has_next": page.has_next,
        "next_cursor": page.next_cursor,
    })))
}

// ── Roles ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RoleBody {
    pub org_id: String,
    pub name: String,
    pub permissions: Vec<String>,
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<RoleBody>,
) -> Result<impl IntoResponse, ApiError> {
    let org_id = OrgId::new(&body.org_id);
    if !auth.superadmin && auth.org_id.as_ref() != Some(&org_id) {
        return Err(ApiError::code(ErrorCode::RoleOrgMismatch));
    }
    if state.store.get_org(&org_id).await?.is_none() {
        return Err(ApiError::code(ErrorCode::NotFound));
    }
    if state.store.find_role(&org_id, &body.name).await?.is_some() {
        return Err(ApiError::code(ErrorCode::RoleNameConflict));
    }

    let role = RoleDocument {
        role_id: Uuid::new_v4().to_string(),
        org_id,
        name: body.name,
        permissions: PermissionSet::from_iter(body.permissions),
        builtin: false,
        created_at: now_ms(),
    };
    state.store.insert_role(&role).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "role_id": role.role_id }))))
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<RoleBody>,
) -> Result<Json<Value>, ApiError> {
    let org_id = OrgId::new(&body.org_id);
    if !auth.superadmin && auth.org_id.as_ref() != Some(&org_id) {
        return Err(ApiError::code(ErrorCode::RoleOrgMismatch));
    }
    let Some(mut role) = state.store.find_role(&org_id, &body.name).await? else {
        return Err(ApiError::code(ErrorCode::NotFound));
    };
    if role.builtin {
        return Err(ApiError::code(ErrorCode::RoleBuiltinReadonly));
    }
    role.permissions = PermissionSet::from_iter(body.permissions);
    state.store.update_role(&role).await?;
    Ok(Json(json!({ "success": true })))
}

// ── Invitations ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvitationBody {
    pub org_id: String,
    pub role: String,
    #[serde(default = "default_invitation_ttl_ms")]
    pub ttl_ms: i64,
}

fn default_invitation_ttl_ms() -> i64 {
    7 * 24 * 3600 * 1000
}

pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<InvitationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let org_id = OrgId::new(&body.org_id);
    if !auth.superadmin && auth.org_id.as_ref() != Some(&org_id) {
        return Err(ApiError::code(ErrorCode::AccessDenied));
    }
    if state.store.get_org(&org_id).await?.is_none() {
        return Err(ApiError::code(ErrorCode::NotFound));
    }

    let now = now_ms();
    let invitation = InvitationDocument {
        invitation_id: Uuid::new_v4().to_string(),
        invitation_token: Uuid::new_v4().simple().to_string(),
        org_id,
        role: body.role,
        accepted: false,
        expires_at: now + body.ttl_ms,
        created_at: now,
    };
    state.store.insert_invitation(&invitation).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "invitation_token": invitation.invitation_token })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationBody {
    pub invitation_token: String,
    pub username: String,
    pub password: String,
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Json(body): Json<AcceptInvitationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(invitation) =
        state.store.find_invitation_by_token(&body.invitation_token).await?
    else {
        return Err(ApiError::code(ErrorCode::InvitationNotFound));
    };
    if invitation.accepted {
        return Err(ApiError::code(ErrorCode::InvitationAlreadyAccepted));
    }
    if invitation.expires_at < now_ms() {
        return Err(ApiError::code(ErrorCode::InvitationExpired));
    }
    if state.store.find_user_by_username(&body.username).await?.is_some() {
        return Err(ApiError::code(ErrorCode::UserAlreadyExists));
    }

    let user = UserDocument {
        user_id: Uuid::new_v4().to_string(),
        username: body.username,
        password_hash: hash_password(&body.password),
        org_id: Some(invitation.org_id.clone()),
        role: invitation.role.clone(),
        superadmin: false,
        created_at: now_ms(),
    };
    state.store.insert_user(&user).await?;
    state.store.mark_invitation_accepted(&invitation.invitation_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "user_id": user.user_id }))))
}

// ── Metrics ───────────────────────────────────────────────────────────────────

pub async fn metrics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    if !auth.superadmin {
        return Err(ApiError::code(ErrorCode::AccessDenied));
    }
    let (dropped, published) = state
        .transport
        .as_ref()
        .map(|t| (t.dropped_count(), t.published_count()))
        .unwrap_or((0, 0));
    let body = state.metrics.render(state.pipeline.backlog_estimate(), dropped, published);
    Ok(([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
