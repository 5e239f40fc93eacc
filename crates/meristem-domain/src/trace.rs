use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{NodeId, TaskId};

/// Immutable per-operation context, created once at each boundary (HTTP
/// handler, subscription callback, scheduler tick) and passed by value to
/// every operation that may log. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub node_id: NodeId,
    pub source: String,
    pub task_id: Option<TaskId>,
}

impl TraceContext {
    /// New root context with a freshly generated trace id. Used when no
    /// trace id was propagated into the boundary.
    pub fn new_root(node_id: NodeId, source: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            node_id,
            source: source.into(),
            task_id: None,
        }
    }

    /// Context carrying a propagated trace id (e.g. from an inbound header
    /// or bus message).
    pub fn propagated(
        trace_id: impl Into<String>,
        node_id: NodeId,
        source: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            node_id,
            source: source.into(),
            task_id: None,
        }
    }

    /// Derive a context scoped to a task. The trace id is preserved.
    pub fn for_task(&self, task_id: TaskId) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            node_id: self.node_id.clone(),
            source: self.source.clone(),
            task_id: Some(task_id),
        }
    }
}
