use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use meristem_domain::{IsolateId, PluginId, PluginManifest};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::CapabilityBroker;
use crate::error::IsolateError;
use crate::host::IsolateHandle;
use crate::message::{
    HealthReportPayload, InvokePayload, InvokeResultPayload, MessageType, PluginMessage,
};

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<PluginMessage>>>>;

/// Request/response client over one isolate port.
///
/// Outbound requests are correlated by frame id; a per-call timeout
/// removes the pending entry so a late reply cannot corrupt correlation
/// state. Inbound plugin-initiated INVOKEs are routed through the
/// capability broker; uncorrelated HEALTH_REPORT frames flow to the
/// health channel.
pub struct IsolateClient {
    plugin_id: PluginId,
    isolate_id: IsolateId,
    to_isolate: mpsc::Sender<PluginMessage>,
    pending: PendingMap,
    invoke_timeout: Duration,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl IsolateClient {
    pub fn new(
        handle: IsolateHandle,
        manifest: Arc<PluginManifest>,
        broker: Arc<CapabilityBroker>,
        health_tx: mpsc::Sender<(PluginId, HealthReportPayload)>,
        invoke_timeout: Duration,
    ) -> Arc<Self> {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let client = Arc::new(Self {
            plugin_id: manifest.id.clone(),
            isolate_id: handle.isolate_id,
            to_isolate: handle.port.to_isolate.clone(),
            pending: pending.clone(),
            invoke_timeout,
            pump: StdMutex::new(None),
        });

        let pump = tokio::spawn(pump_loop(
            handle.port.from_isolate,
            handle.port.to_isolate,
            pending,
            manifest,
            broker,
            health_tx,
        ));
        if let Ok(mut slot) = client.pump.lock() {
            *slot = Some(pump);
        }
        client
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn isolate_id(&self) -> &IsolateId {
        &self.isolate_id
    }

    /// The port's inbound sender, for sinks that push frames to the
    /// isolate outside request/response (e.g. the event bridge).
    pub fn sender(&self) -> mpsc::Sender<PluginMessage> {
        self.to_isolate.clone()
    }

    /// Send a correlated request and await its reply.
    async fn request(
        &self,
        message_type: MessageType,
        payload: Value,
        trace_id: Option<String>,
        method_label: &str,
    ) -> Result<PluginMessage, IsolateError> {
        let frame = PluginMessage::new(self.plugin_id.clone(), message_type, trace_id, payload);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().map_err(|_| IsolateError::ChannelClosed)?;
            pending.insert(frame.id.clone(), reply_tx);
        }
        let id = frame.id.clone();

        if self.to_isolate.send(frame).await.is_err() {
            self.forget(&id);
            return Err(IsolateError::ChannelClosed);
        }

        match tokio::time::timeout(self.invoke_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.forget(&id);
                Err(IsolateError::ChannelClosed)
            }
            Err(_) => {
                self.forget(&id);
                Err(IsolateError::Timeout { method: method_label.to_string() })
            }
        }
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    /// INVOKE `method` on the isolate (hooks use reserved method names).
    pub async fn invoke(
        &self,
        method: &str,
        params: Value,
        trace_id: Option<String>,
    ) -> Result<Value, IsolateError> {
        let payload = serde_json::to_value(InvokePayload {
            method: method.to_string(),
            params,
        })?;
        let reply = self.request(MessageType::Invoke, payload, trace_id, method).await?;
        let result: InvokeResultPayload = serde_json::from_value(reply.payload)?;
        if result.success {
            Ok(result.data.unwrap_or(Value::Null))
        } else {
            let error = result.error.unwrap_or_else(|| crate::message::InvokeErrorPayload {
                code: "UNKNOWN".to_string(),
                message: "invoke failed without error payload".to_string(),
            });
            Err(IsolateError::InvokeFailed {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            })
        }
    }

    /// HEALTH probe; the isolate answers with a HEALTH_REPORT frame.
    pub async fn health(&self) -> Result<HealthReportPayload, IsolateError> {
        let reply = self.request(MessageType::Health, Value::Null, None, "health").await?;
        Ok(serde_json::from_value(reply.payload)?)
    }

    /// Graceful-stop signal; fire and forget.
    pub async fn terminate(&self) {
        let frame = PluginMessage::new(
            self.plugin_id.clone(),
            MessageType::Terminate,
            None,
            Value::Null,
        );
        if self.to_isolate.send(frame).await.is_err() {
            debug!(isolate_id = %self.isolate_id, "terminate after channel close");
        }
    }

    /// Stop the pump and drop all pending correlation state.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(pump) = slot.take() {
                pump.abort();
            }
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

impl Drop for IsolateClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump_loop(
    mut from_isolate: mpsc::Receiver<PluginMessage>,
    to_isolate: mpsc::Sender<PluginMessage>,
    pending: PendingMap,
    manifest: Arc<PluginManifest>,
    broker: Arc<CapabilityBroker>,
    health_tx: mpsc::Sender<(PluginId, HealthReportPayload)>,
) {
    while let Some(frame) = from_isolate.recv().await {
        // Correlated replies win over type-based routing.
        let waiter = match pending.lock() {
            Ok(mut pending) => pending.remove(&frame.id),
            Err(_) => None,
        };
        if let Some(waiter) = waiter {
            let _ = waiter.send(frame);
            continue;
        }

        match frame.message_type {
            MessageType::Invoke => {
                let invoke: InvokePayload = match serde_json::from_value(frame.payload.clone()) {
                    Ok(invoke) => invoke,
                    Err(e) => {
                        warn!(plugin_id = %frame.plugin_id, error = %e, "malformed INVOKE from isolate");
                        continue;
                    }
                };
                let broker = broker.clone();
                let manifest = manifest.clone();
                let to_isolate = to_isolate.clone();
                tokio::spawn(async move {
                    let result = broker.dispatch(&manifest, &invoke).await;
                    let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
                    let reply =
                        PluginMessage::reply_to(&frame, MessageType::InvokeResult, payload);
                    let _ = to_isolate.send(reply).await;
                });
            }
            MessageType::HealthReport => {
                match serde_json::from_value::<HealthReportPayload>(frame.payload) {
                    Ok(report) => {
                        let _ = health_tx.send((frame.plugin_id, report)).await;
                    }
                    Err(e) => {
                        warn!(plugin_id = %frame.plugin_id, error = %e, "malformed health report");
                    }
                }
            }
            other => {
                debug!(plugin_id = %frame.plugin_id, ?other, "unexpected frame from isolate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::IsolatePort;
    use meristem_domain::{
        DefaultLogLevel, Permission, PluginTier, RuntimeProfile, StreamProfile, UiContract,
        UiMode, UiSpec,
    };
    use serde_json::json;

    fn manifest() -> Arc<PluginManifest> {
        Arc::new(PluginManifest {
            id: PluginId::new("io.m.relay"),
            version: "1.0.0".to_string(),
            tier: PluginTier::Extension,
            runtime_profile: RuntimeProfile::Sandbox,
            sdui_version: "1.0".to_string(),
            dependencies: Default::default(),
            entry: "dist/main.js".to_string(),
            ui: UiSpec { mode: UiMode::Sdui, entry: None, icon: None },
            ui_contract: UiContract {
                route: "/plugins/relay".to_string(),
                channels: vec![],
                default_log_level: DefaultLogLevel::Info,
                stream_profile: StreamProfile::Balanced,
            },
            permissions: [Permission::NatsPub].into_iter().collect(),
            events: Default::default(),
            exports: Default::default(),
        })
    }

    /// A scripted far end of an isolate port.
    struct FakeIsolate {
        inbound: mpsc::Receiver<PluginMessage>,
        outbound: mpsc::Sender<PluginMessage>,
    }

    fn wire_up(
        timeout: Duration,
    ) -> (Arc<IsolateClient>, FakeIsolate, mpsc::Receiver<(PluginId, HealthReportPayload)>) {
        let (to_isolate, inbound) = mpsc::channel(16);
        let (outbound, from_isolate) = mpsc::channel(16);
        let (health_tx, health_rx) = mpsc::channel(16);
        let handle = IsolateHandle {
            isolate_id: IsolateId::generate(),
            port: IsolatePort { to_isolate, from_isolate },
        };
        let client = IsolateClient::new(
            handle,
            manifest(),
            CapabilityBroker::new(),
            health_tx,
            timeout,
        );
        (client, FakeIsolate { inbound, outbound }, health_rx)
    }

    #[tokio::test]
    async fn invoke_round_trip() {
        let (client, mut isolate, _health) = wire_up(Duration::from_secs(1));

        let responder = tokio::spawn(async move {
            let request = isolate.inbound.recv().await.unwrap();
            assert_eq!(request.message_type, MessageType::Invoke);
            let reply = PluginMessage::reply_to(
                &request,
                MessageType::InvokeResult,
                serde_json::to_value(InvokeResultPayload::ok(json!({"pong": true}))).unwrap(),
            );
            isolate.outbound.send(reply).await.unwrap();
        });

        let data = client.invoke("ping", json!({}), None).await.unwrap();
        assert_eq!(data["pong"], true);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn invoke_timeout_leaves_correlation_clean() {
        let (client, mut isolate, _health) = wire_up(Duration::from_millis(50));

        // Swallow the request, never reply.
        let silent = tokio::spawn(async move {
            let first = isolate.inbound.recv().await.unwrap();
            // Late reply after the timeout: must be ignored, not crash.
            tokio::time::sleep(Duration::from_millis(100)).await;
            let late = PluginMessage::reply_to(
                &first,
                MessageType::InvokeResult,
                serde_json::to_value(InvokeResultPayload::ok(json!(1))).unwrap(),
            );
            let _ = isolate.outbound.send(late).await;
            isolate
        });

        let err = client.invoke("slow", json!({}), None).await.unwrap_err();
        assert!(matches!(err, IsolateError::Timeout { .. }));

        // Correlation state intact: a fresh request still works.
        let mut isolate = silent.await.unwrap();
        let responder = tokio::spawn(async move {
            let request = isolate.inbound.recv().await.unwrap();
            let reply = PluginMessage::reply_to(
                &request,
                MessageType::InvokeResult,
                serde_json::to_value(InvokeResultPayload::ok(json!(2))).unwrap(),
            );
            isolate.outbound.send(reply).await.unwrap();
        });
        let data = client.invoke("fast", json!({}), None).await.unwrap();
        assert_eq!(data, json!(2));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn invoke_error_surfaces_code() {
        let (client, mut isolate, _health) = wire_up(Duration::from_secs(1));
        tokio::spawn(async move {
            let request = isolate.inbound.recv().await.unwrap();
            let reply = PluginMessage::reply_to(
                &request,
                MessageType::InvokeResult,
                serde_json::to_value(InvokeResultPayload::err("BOOM", "it broke")).unwrap(),
            );
            isolate.outbound.send(reply).await.unwrap();
        });

        let err = client.invoke("explode", json!({}), None).await.unwrap_err();
        match err {
            IsolateError::InvokeFailed { code, message, .. } => {
                assert_eq!(code, "BOOM");
                assert_eq!(message, "it broke");
            }
            other => panic!("expected InvokeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncorrelated_health_report_reaches_monitor_channel() {
        let (client, isolate, mut health) = wire_up(Duration::from_secs(1));
        let report = PluginMessage::new(
            client.plugin_id().clone(),
            MessageType::HealthReport,
            None,
            serde_json::to_value(HealthReportPayload {
                status: "healthy".to_string(),
                memory: None,
                uptime_ms: Some(1_000),
            })
            .unwrap(),
        );
        isolate.outbound.send(report).await.unwrap();

        let (plugin_id, payload) = health.recv().await.unwrap();
        assert_eq!(plugin_id.as_str(), "io.m.relay");
        assert_eq!(payload.status, "healthy");
    }

    #[tokio::test]
    async fn plugin_invoke_is_answered_via_broker() {
        let (to_isolate, mut inbound) = mpsc::channel(16);
        let (outbound, from_isolate) = mpsc::channel(16);
        let (health_tx, _health_rx) = mpsc::channel(16);
        let broker = CapabilityBroker::new();
        broker
            .register(
                "bus.publish",
                Permission::NatsPub,
                Arc::new(|params| Box::pin(async move { Ok(json!({"accepted": params})) })),
            )
            .await;
        let handle = IsolateHandle {
            isolate_id: IsolateId::generate(),
            port: IsolatePort { to_isolate, from_isolate },
        };
        let _client = IsolateClient::new(
            handle,
            manifest(),
            broker,
            health_tx,
            Duration::from_secs(1),
        );

        let request = PluginMessage::new(
            PluginId::new("io.m.relay"),
            MessageType::Invoke,
            None,
            json!({"method": "bus.publish", "params": {"subject": "x"}}),
        );
        outbound.send(request.clone()).await.unwrap();

        let reply = inbound.recv().await.unwrap();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.message_type, MessageType::InvokeResult);
        let result: InvokeResultPayload = serde_json::from_value(reply.payload).unwrap();
        assert!(result.success);
    }
}
