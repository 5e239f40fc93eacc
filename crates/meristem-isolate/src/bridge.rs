use std::sync::Arc;

use meristem_bus::{evaluate_subject, denial_event, Bus, DenialKind};
use meristem_domain::{PermissionSet, PluginManifest};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::IsolateError;
use crate::message::{MessageType, PluginMessage};

/// Forwards bus subjects declared in `manifest.events` onto the isolate
/// port as EVENT frames. Each subject is routed through the subject
/// guard against the manifest's own permission set; violations are
/// returned as denial payloads for the caller to audit, and no
/// subscription is created for them.
pub struct EventBridge {
    tasks: Vec<JoinHandle<()>>,
}

impl EventBridge {
    pub async fn connect(
        manifest: &PluginManifest,
        bus: Arc<dyn Bus>,
        to_isolate: mpsc::Sender<PluginMessage>,
    ) -> Result<(EventBridge, Vec<Value>), IsolateError> {
        let granted = PermissionSet::from_iter(manifest.permissions.iter().map(|p| p.as_str()));
        let mut tasks = Vec::new();
        let mut denials = Vec::new();

        for subject in &manifest.events {
            let decision = evaluate_subject(subject, &granted);
            if !decision.allowed {
                warn!(
                    plugin_id = %manifest.id,
                    subject = %subject,
                    reason = ?decision.reason,
                    "event subscription denied"
                );
                denials.push(denial_event(
                    DenialKind::BusAccess,
                    manifest.id.as_str(),
                    subject,
                    &decision,
                ));
                continue;
            }

            let mut subscription = match bus.subscribe(subject).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(plugin_id = %manifest.id, subject = %subject, error = %e, "subscribe failed");
                    continue;
                }
            };

            let plugin_id = manifest.id.clone();
            let sender = to_isolate.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = subscription.next().await {
                    // JSON when possible, raw text otherwise.
                    let body = serde_json::from_slice::<Value>(&message.payload)
                        .unwrap_or_else(|_| {
                            Value::String(String::from_utf8_lossy(&message.payload).into_owned())
                        });
                    let frame = PluginMessage::new(
                        plugin_id.clone(),
                        MessageType::Event,
                        None,
                        serde_json::json!({
                            "subject": message.subject,
                            "data": body,
                        }),
                    );
                    if sender.send(frame).await.is_err() {
                        debug!(plugin_id = %plugin_id, "isolate port closed; event bridge ends");
                        return;
                    }
                }
            }));
        }

        Ok((EventBridge { tasks }, denials))
    }

    pub fn subscription_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tear down all subscriptions. Called on stop and on reload swap.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meristem_bus::MemoryBus;
    use meristem_domain::{
        DefaultLogLevel, Permission, PluginId, PluginTier, RuntimeProfile, StreamProfile,
        UiContract, UiMode, UiSpec,
    };

    fn manifest(events: &[&str], permissions: &[Permission]) -> PluginManifest {
        PluginManifest {
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
            permissions: permissions.iter().copied().collect(),
            events: events.iter().map(|s| s.to_string()).collect(),
            exports: Default::default(),
        }
    }

    #[tokio::test]
    async fn allowed_subject_is_forwarded_as_event_frame() {
        let bus = Arc::new(MemoryBus::new());
        let (to_isolate, mut inbound) = mpsc::channel(16);
        let manifest = manifest(&["node.n1.status"], &[Permission::NodeRead]);

        let (bridge, denials) =
            EventBridge::connect(&manifest, bus.clone(), to_isolate).await.unwrap();
        assert!(denials.is_empty());
        assert_eq!(bridge.subscription_count(), 1);

        bus.publish("node.n1.status", br#"{"up":true}"#.to_vec()).await.unwrap();
        let frame = inbound.recv().await.unwrap();
        assert_eq!(frame.message_type, MessageType::Event);
        assert_eq!(frame.payload["subject"], "node.n1.status");
        assert_eq!(frame.payload["data"]["up"], true);
        bridge.shutdown();
    }

    #[tokio::test]
    async fn non_json_payload_arrives_as_text() {
        let bus = Arc::new(MemoryBus::new());
        let (to_isolate, mut inbound) = mpsc::channel(16);
        let manifest = manifest(&["node.n1.status"], &[Permission::NodeRead]);
        let (bridge, _) = EventBridge::connect(&manifest, bus.clone(), to_isolate).await.unwrap();

        bus.publish("node.n1.status", b"plain text".to_vec()).await.unwrap();
        let frame = inbound.recv().await.unwrap();
        assert_eq!(frame.payload["data"], "plain text");
        bridge.shutdown();
    }

    #[tokio::test]
    async fn undeclared_subject_is_denied_and_not_subscribed() {
        let bus = Arc::new(MemoryBus::new());
        let (to_isolate, mut inbound) = mpsc::channel(16);
        // Manifest asks for a sys subject without sys:manage.
        let manifest = manifest(&["sys.pulse"], &[Permission::NodeRead]);

        let (bridge, denials) =
            EventBridge::connect(&manifest, bus.clone(), to_isolate).await.unwrap();
        assert_eq!(bridge.subscription_count(), 0);
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0]["event"], "BUS_ACCESS_DENIED");

        bus.publish("sys.pulse", b"x".to_vec()).await.unwrap();
        assert!(inbound.try_recv().is_err());
        bridge.shutdown();
    }

    #[tokio::test]
    async fn unmapped_subject_is_denied_by_default() {
        let bus = Arc::new(MemoryBus::new());
        let (to_isolate, _inbound) = mpsc::channel(16);
        let manifest = manifest(&["custom.subject"], &[Permission::NodeRead]);
        let (bridge, denials) = EventBridge::connect(&manifest, bus, to_isolate).await.unwrap();
        assert_eq!(bridge.subscription_count(), 0);
        assert_eq!(denials[0]["reason"], "DENY_NO_MAPPING");
        bridge.shutdown();
    }
}
