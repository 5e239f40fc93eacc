pub mod error;
pub mod ingest;
pub mod netmode;
pub mod node_monitor;
pub mod shutdown;
pub mod tasks;

pub use error::ControlError;
pub use ingest::{HeartbeatFast, IngestService, PulseCore, PulsePayload};
pub use netmode::{
    Broadcast, NetworkModeChangedEvent, NetworkModeManager, NetworkModeOptions, ProviderSnapshot,
    PROVIDER_CAPABILITY,
};
pub use node_monitor::{NodeMonitor, NodeMonitorConfig};
pub use shutdown::ShutdownLifecycle;
pub use tasks::{ActorIdentity, CreateTaskRequest, TaskPage, TaskService, TaskServiceConfig};
