pub mod document;
pub mod error;
pub mod manifest;
pub mod permission;
pub mod trace;
pub mod types;


pub use document::{
    InvitationDocument, IpShadowLease, NodeDocument, OrgDocument, RoleDocument, TaskDocument,
    TaskLease, UserDocument,
};
pub use error::{DomainError, ErrorCode};
pub use manifest::{
    DefaultLogLevel, PluginManifest, PluginTier, RuntimeProfile, SduiFallback, SduiVersion,
    StreamParams, StreamProfile, UiContract, UiMode, UiSpec,
};
pub use permission::{Permission, PermissionSet};
pub use trace::TraceContext;
pub use types::{
    now_ms, AuditLevel, ConnectionStatus, HealthState, IntentStatus, IsolateId, LifecycleState,
    NetworkMode, NetworkModeReason, NodeId, NodeStatus, OrgId, PluginId, ReclaimStatus, TaskId,
    TaskStatus,
};
