use meristem_domain::{Permission, PermissionSet};
use serde_json::{json, Value};

/// Outcome of a subject authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    pub allowed: bool,
    pub required: Option<Permission>,
    pub reason: Option<&'static str>,
}

/// Which surface produced a denial; selects the audit event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    WsSubscription,
    BusAccess,
}

impl DenialKind {
    fn event_name(self) -> &'static str {
        match self {
            DenialKind::WsSubscription => "WS_SUBSCRIPTION_DENIED",
            DenialKind::BusAccess => "BUS_ACCESS_DENIED",
        }
    }
}

/// Strip the optional `meristem.v1.` prefix.
fn strip_versioned(subject: &str) -> &str {
    subject.strip_prefix("meristem.v1.").unwrap_or(subject)
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('.')
}

/// The closed, ordered subject→permission table. First match wins; extend
/// only by appending. Unmapped subjects have no required permission and
/// are denied outright.
///
/// | pattern                                      | permission    |
/// |----------------------------------------------|---------------|
/// | `(meristem.v1.)?node.<x>.cmd`                | node:cmd      |
/// | `(meristem.v1.)?node.<x>.status|state`       | node:read     |
/// | `task.<x>.status`                            | node:read     |
/// | `(meristem.v1.)?sys.*`                       | sys:manage    |
/// | `(meristem.v1.)?audit.*`                     | sys:audit     |
/// | `(meristem.v1.)?mfs.*`                       | mfs:write     |
/// | `(meristem.v1.)?plugin.*`                    | plugin:access |
pub fn required_permission(subject: &str) -> Option<Permission> {
    let stripped = strip_versioned(subject);
    let parts: Vec<&str> = stripped.split('.').collect();

    if parts.len() == 3 && parts[0] == "node" && is_segment(parts[1]) && parts[2] == "cmd" {
        return Some(Permission::NodeCmd);
    }
    if parts.len() == 3
        && parts[0] == "node"
        && is_segment(parts[1])
        && (parts[2] == "status" || parts[2] == "state")
    {
        return Some(Permission::NodeRead);
    }
    // No versioned prefix on this row.
    let bare: Vec<&str> = subject.split('.').collect();
    if bare.len() == 3 && bare[0] == "task" && is_segment(bare[1]) && bare[2] == "status" {
        return Some(Permission::NodeRead);
    }
    if stripped.starts_with("sys.") {
        return Some(Permission::SysManage);
    }
    if stripped.starts_with("audit.") {
        return Some(Permission::SysAudit);
    }
    if stripped.starts_with("mfs.") {
        return Some(Permission::MfsWrite);
    }
    if stripped.starts_with("plugin.") {
        return Some(Permission::PluginAccess);
    }
    None
}

/// Deny-by-default evaluation: unmapped subjects are denied with
/// `DENY_NO_MAPPING`; mapped subjects are allowed iff the caller's set
/// satisfies the required permission.
pub fn evaluate_subject(subject: &str, permissions: &PermissionSet) -> GuardDecision {
    match required_permission(subject) {
        None => GuardDecision { allowed: false, required: None, reason: Some("DENY_NO_MAPPING") },
        Some(required) => {
            if permissions.satisfies(required) {
                GuardDecision { allowed: true, required: Some(required), reason: None }
            } else {
                GuardDecision {
                    allowed: false,
                    required: Some(required),
                    reason: Some("PERMISSION_MISSING"),
                }
            }
        }
    }
}

/// Audit payload for a denial, recorded by the caller.
pub fn denial_event(
    kind: DenialKind,
    actor: &str,
    subject: &str,
    decision: &GuardDecision,
) -> Value {
    json!({
        "event": kind.event_name(),
        "actor": actor,
        "subject": subject,
        "required_permission": decision.required.map(|p| p.as_str()),
        "reason": decision.reason,
    })
}
