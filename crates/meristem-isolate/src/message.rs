use meristem_domain::{now_ms, PluginId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved hook method names, invoked over the same frame as any other
/// capability call.
pub const HOOK_ON_INIT: &str = "onInit";
pub const HOOK_ON_START: &str = "onStart";
pub const HOOK_ON_STOP: &str = "onStop";
pub const HOOK_ON_DESTROY: &str = "onDestroy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Invoke,
    InvokeResult,
    Health,
    HealthReport,
    Event,
    Terminate,
}

/// The single frame shape crossing every isolate port, both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMessage {
    pub id: String,
    #[serde(rename = "pluginId")]
    pub plugin_id: PluginId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: i64,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none", default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl PluginMessage {
    pub fn new(
        plugin_id: PluginId,
        message_type: MessageType,
        trace_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plugin_id,
            message_type,
            timestamp: now_ms(),
            trace_id,
            payload,
        }
    }

    /// Response frame correlated to `request`.
    pub fn reply_to(request: &PluginMessage, message_type: MessageType, payload: Value) -> Self {
        Self {
            id: request.id.clone(),
            plugin_id: request.plugin_id.clone(),
            message_type,
            timestamp: now_ms(),
            trace_id: request.trace_id.clone(),
            payload,
        }
    }
}

// ── Typed payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokePayload {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResultPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<InvokeErrorPayload>,
}

impl InvokeResultPayload {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(InvokeErrorPayload { code: code.into(), message: message.into() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub rss: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub heap_used: Option<u64>,
}

/// What an isolate reports back on a HEALTH probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReportPayload {
    /// `healthy`, `degraded` or `unhealthy`; mapped by the monitor.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<MemoryUsage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub uptime_ms: Option<u64>,
}
