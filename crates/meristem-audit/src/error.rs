use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("store error: {0}")]
    Store(#[from] meristem_store::StoreError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("integrity violation on intent '{event_id}': {detail}")]
    IntegrityViolation { event_id: String, detail: String },
}
