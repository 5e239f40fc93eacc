use meristem_domain::{IsolateId, LifecycleState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to spawn isolate '{isolate_id}': {reason}")]
    SpawnFailed { isolate_id: IsolateId, reason: String },

    #[error("isolate '{0}' not found")]
    NotFound(IsolateId),

    #[error("isolate channel closed")]
    ChannelClosed,

    #[error("request '{method}' timed out")]
    Timeout { method: String },

    #[error("invoke '{method}' failed: {code}: {message}")]
    InvokeFailed { method: String, code: String, message: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("illegal state for operation: {0}")]
    IllegalState(LifecycleState),
}
