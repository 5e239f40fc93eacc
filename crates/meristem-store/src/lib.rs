pub mod cursor;
pub mod error;
pub mod memory;
pub mod state;
pub mod store;

pub use cursor::TaskCursor;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use state::{
    AuditEventInput, AuditFailure, AuditGlobalAnchor, AuditGlobalState, AuditIntent, AuditLog,
    AuditPartitionState, PartitionHead, PluginRecord,
};
pub use store::{AuditStore, IdentityStore, NodeStore, PluginStore, Store, TaskStore, WriteOp};
