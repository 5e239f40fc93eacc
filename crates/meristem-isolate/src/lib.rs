pub mod bridge;
pub mod broker;
pub mod client;
pub mod error;
pub mod host;
pub mod message;
pub mod process;

pub use bridge::EventBridge;
pub use broker::{CapabilityBroker, PluginContext};
pub use client::IsolateClient;
pub use error::IsolateError;
pub use host::{IsolateHandle, IsolateHost, IsolatePort, IsolateSpec};
pub use message::{
    HealthReportPayload, InvokeErrorPayload, InvokePayload, InvokeResultPayload, MemoryUsage,
    MessageType, PluginMessage, HOOK_ON_DESTROY, HOOK_ON_INIT, HOOK_ON_START, HOOK_ON_STOP,
};
pub use process::ProcessHost;
