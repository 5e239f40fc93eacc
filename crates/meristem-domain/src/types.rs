use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall clock as UTC epoch-milliseconds, the unit used on every
/// persisted and wire-visible timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        NodeId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(pub String);

impl PluginId {
    pub fn new(s: impl Into<String>) -> Self {
        PluginId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reverse-DNS check: at least two dot-separated labels, each starting
    /// with an alphanumeric and containing only `[a-z0-9-]`.
    pub fn is_reverse_dns(&self) -> bool {
        let labels: Vec<&str> = self.0.split('.').collect();
        labels.len() >= 2
            && labels.iter().all(|l| {
                !l.is_empty()
                    && l.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
                    && l.chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            })
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        TaskId(s.into())
    }

    pub fn generate() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(s: impl Into<String>) -> Self {
        OrgId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsolateId(pub String);

impl IsolateId {
    pub fn generate() -> Self {
        IsolateId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IsolateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Plugin lifecycle ──────────────────────────────────────────────────────────

/// The lifecycle state of an installed plugin.
///
/// Transitions (enforced by the lifecycle manager, the sole writer):
///   Loaded       → Initializing
///   Initializing → Starting | InitError
///   Starting     → Running  | StartError
///   Running      → Stopping | Reloading
///   Stopping     → Stopped
///   Stopped      → Destroyed
///   Reloading    → Running            (commit or rollback)
///   InitError    → Initializing       (retry)
///   StartError   → Starting           (retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Loaded,
    Initializing,
    InitError,
    Starting,
    StartError,
    Running,
    Reloading,
    Stopping,
    Stopped,
    Destroyed,
}

impl LifecycleState {
    /// Whether `self → to` is one of the enumerated legal transitions.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Loaded, Initializing)
                | (Initializing, Starting)
                | (Initializing, InitError)
                | (Starting, Running)
                | (Starting, StartError)
                | (Running, Stopping)
                | (Running, Reloading)
                | (Stopping, Stopped)
                | (Stopped, Destroyed)
                | (Reloading, Running)
                | (InitError, Initializing)
                | (StartError, Starting)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Loaded => "LOADED",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::InitError => "INIT_ERROR",
            LifecycleState::Starting => "STARTING",
            LifecycleState::StartError => "START_ERROR",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Reloading => "RELOADING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Destroyed => "DESTROYED",
        };
        write!(f, "{}", s)
    }
}

// ── Plugin health ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Recovering,
    Unresponsive,
    Crashed,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Recovering => "recovering",
            HealthState::Unresponsive => "unresponsive",
            HealthState::Crashed => "crashed",
        };
        write!(f, "{}", s)
    }
}

// ── Network mode ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    #[serde(rename = "DIRECT")]
    Direct,
    #[serde(rename = "M-NET")]
    MNet,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Direct => write!(f, "DIRECT"),
            NetworkMode::MNet => write!(f, "M-NET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkModeReason {
    PluginEnabled,
    PluginDisabled,
    PluginFailure,
    PluginProposal,
    ManualOverride,
}

impl std::fmt::Display for NetworkModeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkModeReason::PluginEnabled => "plugin_enabled",
            NetworkModeReason::PluginDisabled => "plugin_disabled",
            NetworkModeReason::PluginFailure => "plugin_failure",
            NetworkModeReason::PluginProposal => "plugin_proposal",
            NetworkModeReason::ManualOverride => "manual_override",
        };
        write!(f, "{}", s)
    }
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditLevel::Debug => "DEBUG",
            AuditLevel::Info => "INFO",
            AuditLevel::Warn => "WARN",
            AuditLevel::Error => "ERROR",
            AuditLevel::Fatal => "FATAL",
        };
        write!(f, "{}", s)
    }
}

/// Write-behind intent status.
///
/// pending → processing → committed
/// processing → failed_retriable → processing (re-claim)
/// processing | failed_retriable → failed_terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Processing,
    ReadyForGlobalCommit,
    Committed,
    FailedRetriable,
    FailedTerminal,
}

impl IntentStatus {
    /// Statuses counted toward the in-memory backlog.
    pub fn counts_toward_backlog(self) -> bool {
        matches!(
            self,
            IntentStatus::Pending
                | IntentStatus::Processing
                | IntentStatus::ReadyForGlobalCommit
                | IntentStatus::FailedRetriable
        )
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Processing => "processing",
            IntentStatus::ReadyForGlobalCommit => "ready_for_global_commit",
            IntentStatus::Committed => "committed",
            IntentStatus::FailedRetriable => "failed_retriable",
            IntentStatus::FailedTerminal => "failed_terminal",
        };
        write!(f, "{}", s)
    }
}

// ── Node status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    ExpiredCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReclaimStatus {
    Active,
    PendingReclaim,
    Reclaimed,
}

// ── Task status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Leased,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::Leased => "leased",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
