use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meristem_domain::{
    DefaultLogLevel, IsolateId, Permission, PluginId, PluginManifest, PluginTier, RuntimeProfile,
    StreamProfile, UiContract, UiMode, UiSpec,
};
use meristem_isolate::{
    CapabilityBroker, HealthReportPayload, InvokePayload, InvokeResultPayload, IsolateClient,
    IsolateError, IsolateHandle, IsolateHost, IsolatePort, IsolateSpec, MessageType, PluginMessage,
    HOOK_ON_INIT, HOOK_ON_START, HOOK_ON_STOP,
};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How a scripted isolate answers its hooks.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedBehavior {
    pub fail_on_init: bool,
    pub fail_on_start: bool,
    /// Never answer onStop, forcing the stop timeout path.
    pub hang_on_stop: bool,
    pub health_status: String,
    /// Proposal returned by the `network-mode-status` capability, if any.
    pub network_mode_proposal: Option<String>,
}

impl Default for ScriptedBehavior {
    fn default() -> Self {
        Self {
            fail_on_init: false,
            fail_on_start: false,
            hang_on_stop: false,
            health_status: "healthy".to_string(),
            network_mode_proposal: None,
        }
    }
}

pub(crate) fn test_manifest(id: &str) -> PluginManifest {
    PluginManifest {
        id: PluginId::new(id),
        version: "1.0.0".to_string(),
        tier: PluginTier::Extension,
        runtime_profile: RuntimeProfile::Sandbox,
        sdui_version: "1.0".to_string(),
        dependencies: Default::default(),
        entry: "dist/main.js".to_string(),
        ui: UiSpec { mode: UiMode::Sdui, entry: None, icon: None },
        ui_contract: UiContract {
            route: format!("/plugins/{id}"),
            channels: vec![],
            default_log_level: DefaultLogLevel::Info,
            stream_profile: StreamProfile::Balanced,
        },
        permissions: [Permission::NodeRead].into_iter().collect(),
        events: Default::default(),
        exports: Default::default(),
    }
}

fn run_scripted(
    behavior: ScriptedBehavior,
    mut inbound: mpsc::Receiver<PluginMessage>,
    outbound: mpsc::Sender<PluginMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            match frame.message_type {
                MessageType::Invoke => {
                    let invoke: InvokePayload =
                        match serde_json::from_value(frame.payload.clone()) {
                            Ok(invoke) => invoke,
                            Err(_) => continue,
                        };
                    let result = match invoke.method.as_str() {
                        HOOK_ON_INIT if behavior.fail_on_init => {
                            InvokeResultPayload::err("INIT_FAILED", "scripted init failure")
                        }
                        HOOK_ON_START if behavior.fail_on_start => {
                            InvokeResultPayload::err("START_FAILED", "scripted start failure")
                        }
                        HOOK_ON_STOP if behavior.hang_on_stop => continue,
                        "network-mode-status" => match &behavior.network_mode_proposal {
                            Some(mode) => InvokeResultPayload::ok(json!({"mode": mode})),
                            None => InvokeResultPayload::ok(json!(null)),
                        },
                        _ => InvokeResultPayload::ok(json!({"method": invoke.method})),
                    };
                    let reply = PluginMessage::reply_to(
                        &frame,
                        MessageType::InvokeResult,
                        serde_json::to_value(&result).unwrap_or_default(),
                    );
                    if outbound.send(reply).await.is_err() {
                        return;
                    }
                }
                MessageType::Health => {
                    let payload = HealthReportPayload {
                        status: behavior.health_status.clone(),
                        memory: None,
                        uptime_ms: Some(1_000),
                    };
                    let reply = PluginMessage::reply_to(
                        &frame,
                        MessageType::HealthReport,
                        serde_json::to_value(&payload).unwrap_or_default(),
                    );
                    if outbound.send(reply).await.is_err() {
                        return;
                    }
                }
                MessageType::Terminate => {}
                _ => {}
            }
        }
    })
}

/// A client wired to an in-process scripted isolate, for monitor tests.
pub(crate) fn scripted_client(
    plugin_id: &PluginId,
    behavior: ScriptedBehavior,
) -> (Arc<IsolateClient>, JoinHandle<()>) {
    let (to_tx, to_rx) = mpsc::channel(64);
    let (from_tx, from_rx) = mpsc::channel(64);
    let task = run_scripted(behavior, to_rx, from_tx);
    let (health_tx, _health_rx) = mpsc::channel(64);
    let client = IsolateClient::new(
        IsolateHandle {
            isolate_id: IsolateId::generate(),
            port: IsolatePort { to_isolate: to_tx, from_isolate: from_rx },
        },
        Arc::new(test_manifest(plugin_id.as_str())),
        CapabilityBroker::new(),
        health_tx,
        Duration::from_millis(500),
    );
    (client, task)
}

/// Scripted [`IsolateHost`]: each spawn consumes the next queued behavior
/// (falling back to the default) and records every destroy call.
pub(crate) struct FakeHost {
    behaviors: Mutex<VecDeque<ScriptedBehavior>>,
    pub spawned: Mutex<Vec<IsolateId>>,
    pub destroyed: Mutex<Vec<IsolateId>>,
}

impl FakeHost {
    pub fn new(behaviors: Vec<ScriptedBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            spawned: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        })
    }

    pub async fn destroy_count(&self, isolate_id: &IsolateId) -> usize {
        self.destroyed.lock().await.iter().filter(|id| *id == isolate_id).count()
    }
}

#[async_trait]
impl IsolateHost for FakeHost {
    async fn spawn(&self, spec: IsolateSpec) -> Result<IsolateHandle, IsolateError> {
        let behavior = self.behaviors.lock().await.pop_front().unwrap_or_default();
        let (to_tx, to_rx) = mpsc::channel(64);
        let (from_tx, from_rx) = mpsc::channel(64);
        run_scripted(behavior, to_rx, from_tx);
        self.spawned.lock().await.push(spec.isolate_id.clone());
        Ok(IsolateHandle {
            isolate_id: spec.isolate_id,
            port: IsolatePort { to_isolate: to_tx, from_isolate: from_rx },
        })
    }

    async fn destroy(&self, isolate_id: &IsolateId) -> Result<(), IsolateError> {
        self.destroyed.lock().await.push(isolate_id.clone());
        Ok(())
    }
}
