use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meristem_domain::{now_ms, HealthState, PluginId};
use meristem_isolate::{HealthReportPayload, IsolateClient, MemoryUsage};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Supervisor signals emitted by the monitor. The lifecycle side decides
/// what restart means; the monitor only detects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Unresponsive(PluginId),
    MemoryExceeded(PluginId),
}

/// Per-plugin health snapshot. The monitor owns the mutable state;
/// readers get clones.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub plugin_id: PluginId,
    pub status: HealthState,
    pub last_ping: i64,
    pub last_pong: i64,
    pub memory: Option<MemoryUsage>,
    pub uptime_ms: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub ping_interval: Duration,
    pub pong_timeout_ms: i64,
    pub max_consecutive_failures: u32,
    pub memory_threshold_bytes: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            pong_timeout_ms: 15_000,
            max_consecutive_failures: 2,
            memory_threshold_bytes: 512 * 1024 * 1024,
        }
    }
}

struct Entry {
    status: HealthStatus,
    client: Arc<IsolateClient>,
    /// Latched while the current memory-overload episode lasts, so the
    /// supervisor hook fires exactly once per episode.
    memory_episode: bool,
}

/// Ping/pong health monitor over every running plugin's isolate client.
pub struct HealthMonitor {
    config: HealthConfig,
    entries: Mutex<HashMap<PluginId, Entry>>,
    events_tx: mpsc::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> (Arc<Self>, mpsc::Receiver<HealthEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        (Arc::new(Self { config, entries: Mutex::new(HashMap::new()), events_tx }), events_rx)
    }

    pub async fn watch(&self, plugin_id: PluginId, client: Arc<IsolateClient>) {
        let now = now_ms();
        let mut entries = self.entries.lock().await;
        entries.insert(
            plugin_id.clone(),
            Entry {
                status: HealthStatus {
                    plugin_id,
                    status: HealthState::Healthy,
                    last_ping: now,
                    last_pong: now,
                    memory: None,
                    uptime_ms: 0,
                    consecutive_failures: 0,
                },
                client,
                memory_episode: false,
            },
        );
    }

    pub async fn unwatch(&self, plugin_id: &PluginId) {
        self.entries.lock().await.remove(plugin_id);
    }

    /// Swap the watched isolate client after a blue/green reload commit.
    pub async fn swap_client(&self, plugin_id: &PluginId, client: Arc<IsolateClient>) {
        if let Some(entry) = self.entries.lock().await.get_mut(plugin_id) {
            entry.client = client;
            entry.status.consecutive_failures = 0;
            entry.status.last_pong = now_ms();
        }
    }

    pub async fn snapshot(&self, plugin_id: &PluginId) -> Option<HealthStatus> {
        self.entries.lock().await.get(plugin_id).map(|e| e.status.clone())
    }

    /// True iff the last pong is within the timeout and the status is
    /// healthy or recovering.
    pub async fn is_responsive(&self, plugin_id: &PluginId) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(plugin_id) {
            Some(entry) => {
                now_ms() - entry.status.last_pong <= self.config.pong_timeout_ms
                    && matches!(entry.status.status, HealthState::Healthy | HealthState::Recovering)
            }
            None => false,
        }
    }

    /// Ingest one health report (correlated probe reply or plugin-pushed).
    pub async fn handle_report(&self, plugin_id: &PluginId, report: HealthReportPayload) {
        let now = now_ms();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(plugin_id) else {
            return;
        };

        entry.status.last_pong = now;
        entry.status.consecutive_failures = 0;
        entry.status.memory = report.memory;
        if let Some(uptime) = report.uptime_ms {
            entry.status.uptime_ms = uptime;
        }

        let previous = entry.status.status;
        entry.status.status = match report.status.as_str() {
            "healthy" => match previous {
                // Hysteresis: one recovering report before healthy again.
                HealthState::Unresponsive | HealthState::Crashed => HealthState::Recovering,
                HealthState::Recovering => HealthState::Healthy,
                _ => HealthState::Healthy,
            },
            "degraded" => HealthState::Recovering,
            "unhealthy" => HealthState::Unresponsive,
            other => {
                warn!(plugin_id = %plugin_id, status = other, "unknown health report status");
                entry.status.status
            }
        };

        // Memory overload: latch one event per episode.
        let over = report
            .memory
            .map(|m| m.rss > self.config.memory_threshold_bytes)
            .unwrap_or(false);
        if over {
            entry.status.status = HealthState::Unresponsive;
            if !entry.memory_episode {
                entry.memory_episode = true;
                let _ = self.events_tx.send(HealthEvent::MemoryExceeded(plugin_id.clone())).await;
            }
        } else {
            entry.memory_episode = false;
        }
    }

    /// One monitoring pass: probe every watched isolate and evaluate dead
    /// plugins.
    pub async fn tick(&self) {
        let probes: Vec<(PluginId, Arc<IsolateClient>)> = {
            let mut entries = self.entries.lock().await;
            let now = now_ms();
            entries
                .iter_mut()
                .map(|(id, entry)| {
                    entry.status.last_ping = now;
                    (id.clone(), entry.client.clone())
                })
                .collect()
        };

        for (plugin_id, client) in probes {
            match client.health().await {
                Ok(report) => self.handle_report(&plugin_id, report).await,
                Err(e) => {
                    debug!(plugin_id = %plugin_id, error = %e, "health probe failed");
                }
            }
        }

        self.evaluate_dead().await;
    }

    async fn evaluate_dead(&self) {
        let now = now_ms();
        let mut crashed: Vec<PluginId> = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            for (plugin_id, entry) in entries.iter_mut() {
                if now - entry.status.last_pong <= self.config.pong_timeout_ms {
                    continue;
                }
                entry.status.consecutive_failures += 1;
                if entry.status.consecutive_failures == self.config.max_consecutive_failures {
                    entry.status.status = HealthState::Crashed;
                    crashed.push(plugin_id.clone());
                }
            }
        }
        for plugin_id in crashed {
            warn!(plugin_id = %plugin_id, "plugin unresponsive past failure threshold");
            let _ = self.events_tx.send(HealthEvent::Unresponsive(plugin_id)).await;
        }
    }

    /// Monitor loop: periodic probes plus plugin-pushed reports from the
    /// isolate clients' shared health channel.
    pub async fn run(
        self: Arc<Self>,
        mut reports: mpsc::Receiver<(PluginId, HealthReportPayload)>,
    ) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                report = reports.recv() => match report {
                    Some((plugin_id, payload)) => self.handle_report(&plugin_id, payload).await,
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{scripted_client, ScriptedBehavior};

    fn report(status: &str, rss: Option<u64>) -> HealthReportPayload {
        HealthReportPayload {
            status: status.to_string(),
            memory: rss.map(|rss| MemoryUsage { rss, heap_used: None }),
            uptime_ms: Some(1_000),
        }
    }

    async fn monitor_with_plugin(
        config: HealthConfig,
    ) -> (Arc<HealthMonitor>, mpsc::Receiver<HealthEvent>, PluginId) {
        let (monitor, events) = HealthMonitor::new(config);
        let plugin_id = PluginId::new("io.m.relay");
        let (client, _task) = scripted_client(&plugin_id, ScriptedBehavior::default());
        monitor.watch(plugin_id.clone(), client).await;
        (monitor, events, plugin_id)
    }

    #[tokio::test]
    async fn healthy_report_keeps_status_healthy() {
        let (monitor, _events, plugin_id) = monitor_with_plugin(HealthConfig::default()).await;
        monitor.handle_report(&plugin_id, report("healthy", None)).await;
        let status = monitor.snapshot(&plugin_id).await.unwrap();
        assert_eq!(status.status, HealthState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert!(monitor.is_responsive(&plugin_id).await);
    }

    #[tokio::test]
    async fn degraded_maps_to_recovering() {
        let (monitor, _events, plugin_id) = monitor_with_plugin(HealthConfig::default()).await;
        monitor.handle_report(&plugin_id, report("degraded", None)).await;
        let status = monitor.snapshot(&plugin_id).await.unwrap();
        assert_eq!(status.status, HealthState::Recovering);
        assert!(monitor.is_responsive(&plugin_id).await);
    }

    #[tokio::test]
    async fn recovery_hysteresis_takes_two_healthy_reports() {
        let (monitor, _events, plugin_id) = monitor_with_plugin(HealthConfig::default()).await;
        monitor.handle_report(&plugin_id, report("unhealthy", None)).await;
        assert_eq!(
            monitor.snapshot(&plugin_id).await.unwrap().status,
            HealthState::Unresponsive
        );

        monitor.handle_report(&plugin_id, report("healthy", None)).await;
        assert_eq!(monitor.snapshot(&plugin_id).await.unwrap().status, HealthState::Recovering);

        monitor.handle_report(&plugin_id, report("healthy", None)).await;
        assert_eq!(monitor.snapshot(&plugin_id).await.unwrap().status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn memory_overload_fires_once_per_episode() {
        let config = HealthConfig { memory_threshold_bytes: 100, ..Default::default() };
        let (monitor, mut events, plugin_id) = monitor_with_plugin(config).await;

        monitor.handle_report(&plugin_id, report("healthy", Some(200))).await;
        assert_eq!(
            monitor.snapshot(&plugin_id).await.unwrap().status,
            HealthState::Unresponsive
        );
        assert_eq!(events.recv().await, Some(HealthEvent::MemoryExceeded(plugin_id.clone())));

        // Still over: no second event within the same episode.
        monitor.handle_report(&plugin_id, report("healthy", Some(300))).await;
        assert!(events.try_recv().is_err());

        // Back under, then over again: a new episode fires again.
        monitor.handle_report(&plugin_id, report("healthy", Some(50))).await;
        monitor.handle_report(&plugin_id, report("healthy", Some(400))).await;
        assert_eq!(events.recv().await, Some(HealthEvent::MemoryExceeded(plugin_id)));
    }

    #[tokio::test]
    async fn dead_detection_crashes_after_max_failures() {
        let config = HealthConfig {
            pong_timeout_ms: -1, // every pong is already stale
            max_consecutive_failures: 2,
            ..Default::default()
        };
        let (monitor, mut events, plugin_id) = monitor_with_plugin(config).await;

        monitor.evaluate_dead().await;
        assert_eq!(monitor.snapshot(&plugin_id).await.unwrap().consecutive_failures, 1);
        assert!(events.try_recv().is_err());

        monitor.evaluate_dead().await;
        let status = monitor.snapshot(&plugin_id).await.unwrap();
        assert_eq!(status.status, HealthState::Crashed);
        assert_eq!(events.recv().await, Some(HealthEvent::Unresponsive(plugin_id.clone())));
        assert!(!monitor.is_responsive(&plugin_id).await);

        // Past the threshold: counted, but the hook does not re-fire.
        monitor.evaluate_dead().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unwatched_plugin_is_not_responsive() {
        let (monitor, _events, plugin_id) = monitor_with_plugin(HealthConfig::default()).await;
        monitor.unwatch(&plugin_id).await;
        assert!(!monitor.is_responsive(&plugin_id).await);
        assert!(monitor.snapshot(&plugin_id).await.is_none());
    }
}
