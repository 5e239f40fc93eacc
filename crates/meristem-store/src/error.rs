use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("duplicate key on index '{index}'")]
    DuplicateKey { index: String },

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
