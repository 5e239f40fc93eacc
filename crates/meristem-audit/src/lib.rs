pub mod canonical;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod verify;

pub use canonical::{canonical_json, hmac_sha256_hex, sha256_hex};
pub use error::AuditError;
pub use partition::partition_for;
pub use pipeline::{AuditPipeline, PipelineConfig, RecordOutcome};
pub use verify::{verify_chain, ChainReport};
