//! Network-mode arbitration against a live lifecycle manager and a
//! scripted isolate host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meristem_bus::{subjects, Bus, MemoryBus};
use meristem_control::{NetworkModeManager, NetworkModeOptions};
use meristem_domain::{
    DefaultLogLevel, IsolateId, NetworkMode, NetworkModeReason, Permission, PluginId,
    PluginManifest, PluginTier, RuntimeProfile, StreamProfile, UiContract, UiMode, UiSpec,
};
use meristem_isolate::{
    CapabilityBroker, HealthReportPayload, InvokePayload, InvokeResultPayload, IsolateError,
    IsolateHandle, IsolateHost, IsolatePort, IsolateSpec, MessageType, PluginMessage,
};
use meristem_runtime::{HealthConfig, HealthMonitor, LifecycleConfig, LifecycleManager};
use meristem_store::MemoryStore;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

/// Isolate host whose children answer every hook and, when configured,
/// propose a network mode.
struct ScriptedHost {
    proposal: Arc<Mutex<Option<String>>>,
}

impl ScriptedHost {
    fn new() -> (Arc<Self>, Arc<Mutex<Option<String>>>) {
        let proposal = Arc::new(Mutex::new(None));
        (Arc::new(Self { proposal: proposal.clone() }), proposal)
    }
}

#[async_trait]
impl IsolateHost for ScriptedHost {
    async fn spawn(&self, spec: IsolateSpec) -> Result<IsolateHandle, IsolateError> {
        let (to_tx, mut to_rx) = mpsc::channel::<PluginMessage>(64);
        let (from_tx, from_rx) = mpsc::channel::<PluginMessage>(64);
        let proposal = self.proposal.clone();

        tokio::spawn(async move {
            while let Some(frame) = to_rx.recv().await {
                match frame.message_type {
                    MessageType::Invoke => {
                        let invoke: InvokePayload =
                            match serde_json::from_value(frame.payload.clone()) {
                                Ok(invoke) => invoke,
                                Err(_) => continue,
                            };
                        let result = if invoke.method == "network-mode-status" {
                            match proposal.lock().await.clone() {
                                Some(mode) => InvokeResultPayload::ok(json!({"mode": mode})),
                                None => InvokeResultPayload::ok(json!(null)),
                            }
                        } else {
                            InvokeResultPayload::ok(json!({}))
                        };
                        let reply = PluginMessage::reply_to(
                            &frame,
                            MessageType::InvokeResult,
                            serde_json::to_value(&result).unwrap_or_default(),
                        );
                        if from_tx.send(reply).await.is_err() {
                            return;
                        }
                    }
                    MessageType::Health => {
                        let reply = PluginMessage::reply_to(
                            &frame,
                            MessageType::HealthReport,
                            serde_json::to_value(HealthReportPayload {
                                status: "healthy".to_string(),
                                memory: None,
                                uptime_ms: Some(1),
                            })
                            .unwrap_or_default(),
                        );
                        if from_tx.send(reply).await.is_err() {
                            return;
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(IsolateHandle {
            isolate_id: spec.isolate_id,
            port: IsolatePort { to_isolate: to_tx, from_isolate: from_rx },
        })
    }

    async fn destroy(&self, _isolate_id: &IsolateId) -> Result<(), IsolateError> {
        Ok(())
    }
}

fn provider_manifest(id: &str) -> PluginManifest {
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
        exports: ["network-mode-status".to_string()].into_iter().collect(),
    }
}

struct Rig {
    lifecycle: Arc<LifecycleManager>,
    monitor: Arc<HealthMonitor>,
    netmode: Arc<NetworkModeManager>,
    bus: Arc<MemoryBus>,
    proposal: Arc<Mutex<Option<String>>>,
    provider_id: PluginId,
}

async fn rig() -> Rig {
    let (host, proposal) = ScriptedHost::new();
    let store = Arc::new(MemoryStore::new());
    let (monitor, _events) = HealthMonitor::new(HealthConfig::default());
    let (health_tx, _health_rx) = mpsc::channel(64);
    let bus = Arc::new(MemoryBus::new());
    let lifecycle = LifecycleManager::new(
        LifecycleConfig {
            invoke_timeout: Duration::from_millis(400),
            ..Default::default()
        },
        host,
        bus.clone(),
        CapabilityBroker::new(),
        monitor.clone(),
        store,
        health_tx,
    );
    let netmode = NetworkModeManager::new(
        lifecycle.clone(),
        monitor.clone(),
        bus.clone(),
        None,
        NetworkModeOptions::default(),
    );
    Rig {
        lifecycle,
        monitor,
        netmode,
        bus,
        proposal,
        provider_id: PluginId::new("io.m.netplugin"),
    }
}

#[tokio::test]
async fn full_arbitration_scenario() {
    let rig = rig().await;
    let mut sub = rig.bus.subscribe(subjects::NETWORK_MODE).await.unwrap();

    // No providers: DIRECT, no events.
    assert!(rig.netmode.tick().await.is_none());
    assert_eq!(rig.netmode.current().await, NetworkMode::Direct);
    assert!(sub.try_next().is_none());

    // Provider loaded + running + healthy: DIRECT -> M-NET, plugin_enabled.
    rig.lifecycle.load(provider_manifest("io.m.netplugin"), json!({})).await.unwrap();
    rig.lifecycle.init(&rig.provider_id).await.unwrap();
    rig.lifecycle.start(&rig.provider_id).await.unwrap();

    let event = rig.netmode.tick().await.expect("enable transition");
    assert_eq!(event.from, NetworkMode::Direct);
    assert_eq!(event.to, NetworkMode::MNet);
    assert_eq!(event.reason, NetworkModeReason::PluginEnabled);
    assert!(sub.next().await.is_some(), "single publish expected");
    assert!(sub.try_next().is_none());

    // Stable state: another tick emits nothing.
    assert!(rig.netmode.tick().await.is_none());

    // Provider flips unhealthy: M-NET -> DIRECT, plugin_failure.
    rig.monitor
        .handle_report(
            &rig.provider_id,
            HealthReportPayload { status: "unhealthy".to_string(), memory: None, uptime_ms: None },
        )
        .await;
    let event = rig.netmode.tick().await.expect("failure transition");
    assert_eq!(event.to, NetworkMode::Direct);
    assert_eq!(event.reason, NetworkModeReason::PluginFailure);

    // Healthy again (through recovery hysteresis) and proposing DIRECT:
    // the proposal wins and M-NET is never entered.
    rig.monitor
        .handle_report(
            &rig.provider_id,
            HealthReportPayload { status: "healthy".to_string(), memory: None, uptime_ms: None },
        )
        .await;
    *rig.proposal.lock().await = Some("DIRECT".to_string());
    assert!(rig.netmode.tick().await.is_none(), "proposal keeps DIRECT");
    assert_eq!(rig.netmode.current().await, NetworkMode::Direct);

    // Proposal switches to M-NET with a healthy provider.
    *rig.proposal.lock().await = Some("M-NET".to_string());
    let event = rig.netmode.tick().await.expect("proposal transition");
    assert_eq!(event.to, NetworkMode::MNet);
    assert_eq!(event.reason, NetworkModeReason::PluginProposal);

    // Healthy provider proposes DIRECT: M-NET -> DIRECT, plugin_proposal.
    *rig.proposal.lock().await = Some("DIRECT".to_string());
    let event = rig.netmode.tick().await.expect("direct proposal transition");
    assert_eq!(event.from, NetworkMode::MNet);
    assert_eq!(event.to, NetworkMode::Direct);
    assert_eq!(event.reason, NetworkModeReason::PluginProposal);
}

#[tokio::test]
async fn stopped_provider_reads_as_disabled() {
    let rig = rig().await;
    rig.lifecycle.load(provider_manifest("io.m.netplugin"), json!({})).await.unwrap();
    rig.lifecycle.init(&rig.provider_id).await.unwrap();
    rig.lifecycle.start(&rig.provider_id).await.unwrap();
    rig.netmode.tick().await.expect("enabled");

    rig.lifecycle.stop(&rig.provider_id).await.unwrap();
    let event = rig.netmode.tick().await.expect("disable transition");
    assert_eq!(event.to, NetworkMode::Direct);
    assert_eq!(event.reason, NetworkModeReason::PluginDisabled);
}
