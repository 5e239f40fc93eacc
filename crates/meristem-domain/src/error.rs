use serde_json::{Map, Value};
use thiserror::Error;

/// Stable error codes surfaced to clients. The HTTP status is fixed per
/// code; user-visible responses carry only `{success:false, error:<CODE>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    NotFound,
    Unauthorized,
    AccessDenied,
    InvalidCursor,
    InvalidBootstrapToken,
    BootstrapAlreadyCompleted,
    AuthInvalidCredentials,
    UserAlreadyExists,
    RoleOrgMismatch,
    RoleNameConflict,
    RoleBuiltinReadonly,
    InvitationNotFound,
    InvitationAlreadyAccepted,
    InvitationExpired,
    InvalidCallDepth,
    TaskCreationFailed,
    ResultSubmissionFailed,
    TaskNotFound,
    AuditBackpressure,
    TransactionAborted,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::InvalidCursor => "INVALID_CURSOR",
            ErrorCode::InvalidBootstrapToken => "INVALID_BOOTSTRAP_TOKEN",
            ErrorCode::BootstrapAlreadyCompleted => "BOOTSTRAP_ALREADY_COMPLETED",
            ErrorCode::AuthInvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            ErrorCode::UserAlreadyExists => "USER_ALREADY_EXISTS",
            ErrorCode::RoleOrgMismatch => "ROLE_ORG_MISMATCH",
            ErrorCode::RoleNameConflict => "ROLE_NAME_CONFLICT",
            ErrorCode::RoleBuiltinReadonly => "ROLE_BUILTIN_READONLY",
            ErrorCode::InvitationNotFound => "INVITATION_NOT_FOUND",
            ErrorCode::InvitationAlreadyAccepted => "INVITATION_ALREADY_ACCEPTED",
            ErrorCode::InvitationExpired => "INVITATION_EXPIRED",
            ErrorCode::InvalidCallDepth => "INVALID_CALL_DEPTH",
            ErrorCode::TaskCreationFailed => "TASK_CREATION_FAILED",
            ErrorCode::ResultSubmissionFailed => "RESULT_SUBMISSION_FAILED",
            ErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            ErrorCode::AuditBackpressure => "AUDIT_BACKPRESSURE",
            ErrorCode::TransactionAborted => "TRANSACTION_ABORTED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InternalError => 500,
            ErrorCode::NotFound => 404,
            ErrorCode::Unauthorized => 401,
            ErrorCode::AccessDenied => 403,
            ErrorCode::InvalidCursor => 400,
            ErrorCode::InvalidBootstrapToken => 400,
            ErrorCode::BootstrapAlreadyCompleted => 409,
            ErrorCode::AuthInvalidCredentials => 401,
            ErrorCode::UserAlreadyExists => 409,
            ErrorCode::RoleOrgMismatch => 400,
            ErrorCode::RoleNameConflict => 409,
            ErrorCode::RoleBuiltinReadonly => 400,
            ErrorCode::InvitationNotFound => 404,
            ErrorCode::InvitationAlreadyAccepted => 409,
            ErrorCode::InvitationExpired => 410,
            ErrorCode::InvalidCallDepth => 400,
            ErrorCode::TaskCreationFailed => 500,
            ErrorCode::ResultSubmissionFailed => 500,
            ErrorCode::TaskNotFound => 404,
            ErrorCode::AuditBackpressure => 503,
            ErrorCode::TransactionAborted => 409,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tagged domain failure. Translation from lower-level errors to codes
/// happens at subsystem boundaries; unknown failures become
/// `INTERNAL_ERROR` with `meta.reason` describing the origin.
#[derive(Debug, Error)]
#[error("{code}")]
pub struct DomainError {
    pub code: ErrorCode,
    pub meta: Map<String, Value>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DomainError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, meta: Map::new(), cause: None }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap an arbitrary failure as `INTERNAL_ERROR`, recording where it
    /// came from in `meta.reason`.
    pub fn internal(reason: impl Into<String>) -> Self {
        DomainError::new(ErrorCode::InternalError).with_meta("reason", reason.into())
    }

    pub fn status(&self) -> u16 {
        self.code.http_status()
    }
}

impl From<ErrorCode> for DomainError {
    fn from(code: ErrorCode) -> Self {
        DomainError::new(code)
    }
}
