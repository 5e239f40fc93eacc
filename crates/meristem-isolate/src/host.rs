use std::path::PathBuf;

use async_trait::async_trait;
use meristem_domain::{IsolateId, PluginManifest};
use tokio::sync::mpsc;

use crate::error::IsolateError;
use crate::message::PluginMessage;

/// Everything needed to bring up one isolate.
#[derive(Debug, Clone)]
pub struct IsolateSpec {
    pub isolate_id: IsolateId,
    pub manifest: PluginManifest,
    /// Resolved entry path inside the plugin root.
    pub entry_path: PathBuf,
}

/// The two ends of the isolate's single message channel, as seen from the
/// core: `to_isolate` sends frames in, `from_isolate` yields frames out.
#[derive(Debug)]
pub struct IsolatePort {
    pub to_isolate: mpsc::Sender<PluginMessage>,
    pub from_isolate: mpsc::Receiver<PluginMessage>,
}

/// A live isolate as returned by [`IsolateHost::spawn`].
#[derive(Debug)]
pub struct IsolateHandle {
    pub isolate_id: IsolateId,
    pub port: IsolatePort,
}

/// Spawns and destroys sandboxed execution contexts. The core exposes no
/// globals to the isolate; the port is the only conduit.
#[async_trait]
pub trait IsolateHost: Send + Sync + 'static {
    async fn spawn(&self, spec: IsolateSpec) -> Result<IsolateHandle, IsolateError>;

    /// Tear down the channel and release all host-side resources. Safe to
    /// call for ids that already exited.
    async fn destroy(&self, isolate_id: &IsolateId) -> Result<(), IsolateError>;
}
