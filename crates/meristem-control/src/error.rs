use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("store error: {0}")]
    Store(#[from] meristem_store::StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] meristem_bus::BusError),

    #[error("audit error: {0}")]
    Audit(#[from] meristem_audit::AuditError),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("domain error: {0}")]
    Domain(#[from] meristem_domain::DomainError),
}
