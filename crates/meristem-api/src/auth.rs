use std::path::{Path, PathBuf};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use meristem_domain::{now_ms, ErrorCode, OrgId, PermissionSet, UserDocument};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub org_id: Option<String>,
    pub permissions: Vec<String>,
    pub superadmin: bool,
    pub iat: i64,
    pub exp: i64,
    /// UI-contract token restriction: the only topics this token may
    /// subscribe to over the WebSocket.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allowed_topics: Option<Vec<String>>,
}

/// Signing and verification material. The sign secret issues tokens;
/// verification walks every verify secret, so rotated-out secrets keep
/// validating during the grace window.
#[derive(Debug, Clone)]
pub struct AuthKeys {
    pub sign_secret: String,
    pub verify_secrets: Vec<String>,
    pub key_id: String,
    pub token_ttl_seconds: i64,
}

impl AuthKeys {
    pub fn issue(&self, user: &UserDocument, permissions: Vec<String>) -> Result<String, ApiError> {
        let now = now_ms() / 1000;
        let claims = Claims {
            sub: user.user_id.clone(),
            org_id: user.org_id.as_ref().map(|o| o.to_string()),
            permissions,
            superadmin: user.superadmin,
            iat: now,
            exp: now + self.token_ttl_seconds,
            allowed_topics: None,
        };
        let mut header = Header::default();
        header.kid = Some(self.key_id.clone());
        encode(&header, &claims, &EncodingKey::from_secret(self.sign_secret.as_bytes()))
            .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))
    }

    /// Multi-secret verification for rotation: the first secret that
    /// validates wins.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let validation = Validation::default();
        for secret in &self.verify_secrets {
            if let Ok(data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Some(data.claims);
            }
        }
        None
    }
}

/// Authenticated caller identity, inserted as a request extension by the
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub org_id: Option<OrgId>,
    pub permissions: PermissionSet,
    pub superadmin: bool,
}

impl From<&Claims> for AuthContext {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            org_id: claims.org_id.as_deref().map(OrgId::new),
            permissions: PermissionSet::from_iter(claims.permissions.iter().cloned()),
            superadmin: claims.superadmin,
        }
    }
}

/// Axum middleware requiring a valid bearer token on every protected
/// route.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match token.and_then(|t| state.auth.verify(t)) {
        Some(claims) => {
            request.extensions_mut().insert(AuthContext::from(&claims));
            next.run(request).await
        }
        None => ApiError::code(ErrorCode::Unauthorized).into_response(),
    }
}

// ── Password hashing ──────────────────────────────────────────────────────────

/// Salted digest stored as `salt$hex`. The salt is random per user.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = password_digest(&salt, password);
    format!("{salt}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    password_digest(salt, password) == digest
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"\x00");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Rotation state file ───────────────────────────────────────────────────────

/// Process-global record of the active signing key, persisted under the
/// home directory so restarts keep issuing under the same key id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    pub key_id: String,
    pub rotated_at: i64,
}

pub fn rotation_state_path(home: &Path) -> PathBuf {
    home.join("jwt_rotation.json")
}

pub fn load_rotation_state(home: &Path) -> Option<RotationState> {
    let raw = std::fs::read_to_string(rotation_state_path(home)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "unreadable jwt rotation state; reinitializing");
            None
        }
    }
}

pub fn store_rotation_state(home: &Path, state: &RotationState) -> std::io::Result<()> {
    if let Some(parent) = rotation_state_path(home).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(state).unwrap_or_default();
    std::fs::write(rotation_state_path(home), raw)?;
    debug!(key_id = %state.key_id, "jwt rotation state persisted");
    Ok(())
}

/// Resolve the active key id: reuse the persisted one when it matches
/// the configured id, else persist the configured id as a fresh rotation.
pub fn resolve_key_id(home: &Path, configured: &str) -> String {
    match load_rotation_state(home) {
        Some(state) if state.key_id == configured => state.key_id,
        _ => {
            let state = RotationState { key_id: configured.to_string(), rotated_at: now_ms() };
            if let Err(e) = store_rotation_state(home, &state) {
                warn!(error = %e, "jwt rotation state write failed");
            }
            state.key_id
        }
    }
}
