use std::sync::Arc;

use meristem_bus::{subjects, Bus};
use meristem_domain::{NodeId, TraceContext};
use meristem_log::{BusTransport, ContextLogger};
use meristem_store::{NodeStore, Store};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ControlError;

/// Heartbeat fast-path shape on `meristem.v1.hb.>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatFast {
    pub node_id: String,
    pub ts: i64,
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(default)]
    pub claimed_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseCore {
    pub cpu_load: f64,
    pub ram_usage: f64,
    #[serde(default)]
    pub net_io: Option<Value>,
}

/// Pulse telemetry on `meristem.v1.sys.pulse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsePayload {
    pub node_id: String,
    pub ts: i64,
    pub core: PulseCore,
    /// Node-side plugin telemetry; logged, never persisted. The health
    /// monitor owns plugin health.
    #[serde(default)]
    pub plugins: Option<Value>,
}

/// Decodes heartbeat and pulse subjects into store and log effects.
pub struct IngestService {
    store: Arc<dyn Store>,
    core_node_id: NodeId,
    transport: Option<Arc<BusTransport>>,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn Store>,
        core_node_id: NodeId,
        transport: Option<Arc<BusTransport>>,
    ) -> Arc<Self> {
        Arc::new(Self { store, core_node_id, transport })
    }

    pub async fn handle_heartbeat(&self, payload: &[u8]) -> Result<(), ControlError> {
        let hb: HeartbeatFast = serde_json::from_slice(payload)?;
        self.store
            .record_heartbeat(&NodeId::new(&hb.node_id), hb.ts, hb.claimed_ip.as_deref())
            .await?;
        debug!(node_id = %hb.node_id, ts = hb.ts, "heartbeat recorded");
        Ok(())
    }

    pub async fn handle_pulse(&self, payload: &[u8]) -> Result<PulsePayload, ControlError> {
        let mut pulse: PulsePayload = serde_json::from_slice(payload)?;
        pulse.core.ram_usage = pulse.core.ram_usage.clamp(0.0, 1.0);
        pulse.core.cpu_load = (pulse.core.cpu_load.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;

        // Broad-strokes snapshot through the envelope logger.
        let ctx = TraceContext::new_root(self.core_node_id.clone(), "pulse-ingest");
        let logger = ContextLogger::new(ctx, self.transport.clone());
        let mut meta = Map::new();
        meta.insert("triad_type".to_string(), json!("snapshot"));
        meta.insert("node_id".to_string(), json!(pulse.node_id));
        meta.insert("cpu_load".to_string(), json!(pulse.core.cpu_load));
        meta.insert("ram_usage".to_string(), json!(pulse.core.ram_usage));
        logger.debug("node pulse", meta);
        Ok(pulse)
    }

    /// Subscribe the inbound subjects and route messages until the bus
    /// closes.
    pub fn spawn_subscriptions(self: Arc<Self>, bus: Arc<dyn Bus>) -> Vec<JoinHandle<()>> {
        let hb_service = self.clone();
        let hb_bus = bus.clone();
        let heartbeat = tokio::spawn(async move {
            let mut sub = match hb_bus.subscribe(subjects::HEARTBEAT_WILDCARD).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(error = %e, "heartbeat subscription failed");
                    return;
                }
            };
            while let Some(message) = sub.next().await {
                if let Err(e) = hb_service.handle_heartbeat(&message.payload).await {
                    warn!(subject = %message.subject, error = %e, "heartbeat ingest failed");
                }
            }
        });

        let pulse_service = self;
        let pulse = tokio::spawn(async move {
            let mut sub = match bus.subscribe(subjects::SYS_PULSE).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(error = %e, "pulse subscription failed");
                    return;
                }
            };
            while let Some(message) = sub.next().await {
                if let Err(e) = pulse_service.handle_pulse(&message.payload).await {
                    warn!(error = %e, "pulse ingest failed");
                }
            }
        });

        vec![heartbeat, pulse]
    }
}
