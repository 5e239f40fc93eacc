use meristem_domain::{AuditLevel, NodeId, TaskId};
use meristem_bus::subjects;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One formatted log record, emitted to the local stderr sink and to the
/// bus transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEnvelope {
    pub ts: i64,
    pub level: AuditLevel,
    pub node_id: NodeId,
    pub source: String,
    pub trace_id: String,
    pub content: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl LogEnvelope {
    /// Task id carried in `meta.taskId` or `meta.task_id`, when present.
    pub fn task_id(&self) -> Option<TaskId> {
        self.meta
            .get("taskId")
            .or_else(|| self.meta.get("task_id"))
            .and_then(|v| v.as_str())
            .map(TaskId::new)
    }

    /// Publish subject: task-scoped when a task id is present, else the
    /// node's sys subject.
    pub fn subject(&self) -> String {
        match self.task_id() {
            Some(task_id) => subjects::logs_task(&self.node_id, &task_id),
            None => subjects::logs_sys(&self.node_id),
        }
    }
}

/// One slice of an oversized envelope. Consumers reassemble fragments by
/// `fragment_id` until `fragment_total` arrive or `fragment_expires_at`
/// passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFragment {
    pub fragment_id: String,
    pub fragment_index: u32,
    pub fragment_total: u32,
    pub fragment_subject: String,
    pub fragment_expires_at: i64,
    pub trace_id: String,
    pub payload_chunk: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(meta: Map<String, Value>) -> LogEnvelope {
        LogEnvelope {
            ts: 1,
            level: AuditLevel::Info,
            node_id: NodeId::new("n1"),
            source: "test".to_string(),
            trace_id: "tr".to_string(),
            content: "hi".to_string(),
            meta,
        }
    }

    #[test]
    fn sys_subject_without_task() {
        assert_eq!(envelope(Map::new()).subject(), "meristem.v1.logs.sys.n1");
    }

    #[test]
    fn task_subject_from_camel_case_meta() {
        let mut meta = Map::new();
        meta.insert("taskId".to_string(), json!("t7"));
        assert_eq!(envelope(meta).subject(), "meristem.v1.logs.task.n1.t7");
    }

    #[test]
    fn task_subject_from_snake_case_meta() {
        let mut meta = Map::new();
        meta.insert("task_id".to_string(), json!("t8"));
        assert_eq!(envelope(meta).subject(), "meristem.v1.logs.task.n1.t8");
    }
}
