use meristem_domain::{NodeId, TaskId};

/// Inbound heartbeat wildcard.
pub const HEARTBEAT_WILDCARD: &str = "meristem.v1.hb.>";

/// Inbound node pulse telemetry.
pub const SYS_PULSE: &str = "meristem.v1.sys.pulse";

/// Outbound network-mode transition events.
pub const NETWORK_MODE: &str = "meristem.v1.sys.network.mode";

/// WebSocket fanout topic mirroring [`NETWORK_MODE`].
pub const NETWORK_MODE_TOPIC: &str = "sys.network.mode";

/// System log envelope subject for a node.
pub fn logs_sys(node_id: &NodeId) -> String {
    format!("meristem.v1.logs.sys.{}", node_id)
}

/// Task-scoped log envelope subject.
pub fn logs_task(node_id: &NodeId, task_id: &TaskId) -> String {
    format!("meristem.v1.logs.task.{}.{}", node_id, task_id)
}

/// NATS-style subject match: `*` matches exactly one token, a trailing
/// `>` matches one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.').peekable();
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.peek().is_none(),
            (Some(">"), None) => return false,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) => {
                if p != s {
                    return false;
                }
            }
            (None, None) => return true,
            (None, Some(_)) | (Some(_), None) => return false,
        }
    }
}
