use std::io::Write;
use std::sync::Arc;

use meristem_domain::{now_ms, AuditLevel, TraceContext};
use serde_json::{Map, Value};

use crate::envelope::LogEnvelope;
use crate::transport::BusTransport;

/// A logger bound to one [`TraceContext`]. Every record becomes an
/// envelope emitted to two sinks: the synchronous stderr writer and the
/// bus transport.
#[derive(Clone)]
pub struct ContextLogger {
    ctx: TraceContext,
    transport: Option<Arc<BusTransport>>,
}

impl ContextLogger {
    pub fn new(ctx: TraceContext, transport: Option<Arc<BusTransport>>) -> Self {
        Self { ctx, transport }
    }

    pub fn context(&self) -> &TraceContext {
        &self.ctx
    }

    pub fn debug(&self, content: impl Into<String>, meta: Map<String, Value>) {
        self.emit(AuditLevel::Debug, content.into(), meta);
    }

    pub fn info(&self, content: impl Into<String>, meta: Map<String, Value>) {
        self.emit(AuditLevel::Info, content.into(), meta);
    }

    pub fn warn(&self, content: impl Into<String>, meta: Map<String, Value>) {
        self.emit(AuditLevel::Warn, content.into(), meta);
    }

    pub fn error(&self, content: impl Into<String>, meta: Map<String, Value>) {
        self.emit(AuditLevel::Error, content.into(), meta);
    }

    pub fn fatal(&self, content: impl Into<String>, meta: Map<String, Value>) {
        self.emit(AuditLevel::Fatal, content.into(), meta);
    }

    fn emit(&self, level: AuditLevel, content: String, mut meta: Map<String, Value>) {
        if let Some(task_id) = &self.ctx.task_id {
            meta.entry("task_id".to_string())
                .or_insert_with(|| Value::String(task_id.to_string()));
        }
        let envelope = LogEnvelope {
            ts: now_ms(),
            level,
            node_id: self.ctx.node_id.clone(),
            source: self.ctx.source.clone(),
            trace_id: self.ctx.trace_id.clone(),
            content,
            meta,
        };

        if let Ok(line) = serde_json::to_string(&envelope) {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = writeln!(handle, "{}", line);
        }

        if let Some(transport) = &self.transport {
            transport.push(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;
    use meristem_domain::NodeId;
    use serde_json::json;

    #[test]
    fn envelope_lands_in_transport_with_task_meta() {
        let transport = BusTransport::new(TransportConfig::default());
        let ctx = TraceContext::new_root(NodeId::new("n1"), "scheduler")
            .for_task(meristem_domain::TaskId::new("t1"));
        let logger = ContextLogger::new(ctx, Some(transport.clone()));

        logger.info("task picked up", Map::new());
        assert_eq!(transport.buffered_count(), 1);
    }

    #[test]
    fn explicit_meta_task_id_wins() {
        let transport = BusTransport::new(TransportConfig::default());
        let ctx = TraceContext::new_root(NodeId::new("n1"), "scheduler")
            .for_task(meristem_domain::TaskId::new("from-ctx"));
        let logger = ContextLogger::new(ctx, Some(transport.clone()));

        let mut meta = Map::new();
        meta.insert("task_id".to_string(), json!("explicit"));
        logger.info("x", meta);
        assert_eq!(transport.buffered_count(), 1);
    }

    #[test]
    fn logger_without_transport_still_works() {
        let ctx = TraceContext::new_root(NodeId::new("n1"), "api");
        let logger = ContextLogger::new(ctx, None);
        logger.warn("stderr only", Map::new());
    }
}
