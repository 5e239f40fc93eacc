use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("publish failed on '{subject}': {reason}")]
    PublishFailed { subject: String, reason: String },

    #[error("invalid subject pattern '{0}'")]
    InvalidPattern(String),
}
