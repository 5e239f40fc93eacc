use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use meristem_bus::Bus;
use meristem_domain::{now_ms, IsolateId, LifecycleState, PluginId, PluginManifest};
use meristem_isolate::{
    CapabilityBroker, EventBridge, HealthReportPayload, IsolateClient, IsolateHost, IsolateSpec,
    HOOK_ON_INIT, HOOK_ON_START, HOOK_ON_STOP,
};
use meristem_store::{PluginRecord, PluginStore, Store};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::health::{HealthEvent, HealthMonitor};

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub base_path: PathBuf,
    pub stop_timeout: Duration,
    pub reload_timeout: Duration,
    pub invoke_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("plugins"),
            stop_timeout: Duration::from_secs(3),
            reload_timeout: Duration::from_secs(5),
            invoke_timeout: Duration::from_secs(10),
        }
    }
}

/// What `start` hands back: denied event subjects for the caller to audit.
#[derive(Debug, Default)]
pub struct StartOutcome {
    pub denials: Vec<Value>,
}

/// Read-only view of one plugin's lifecycle. Readers never see the
/// manager's internals.
#[derive(Debug, Clone)]
pub struct PluginSnapshot {
    pub plugin_id: PluginId,
    pub state: LifecycleState,
    pub config_version: u64,
    pub isolate_id: Option<IsolateId>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub error_last: Option<String>,
}

struct Entry {
    manifest: Arc<PluginManifest>,
    state: LifecycleState,
    config: Value,
    config_version: u64,
    entry_path: PathBuf,
    client: Option<Arc<IsolateClient>>,
    bridge: Option<EventBridge>,
    started_at: Option<i64>,
    stopped_at: Option<i64>,
    error_last: Option<String>,
}

impl Entry {
    fn snapshot(&self, plugin_id: &PluginId) -> PluginSnapshot {
        PluginSnapshot {
            plugin_id: plugin_id.clone(),
            state: self.state,
            config_version: self.config_version,
            isolate_id: self.client.as_ref().map(|c| c.isolate_id().clone()),
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            error_last: self.error_last.clone(),
        }
    }
}

/// Owns the lifecycle of every installed plugin and is the only writer of
/// its state. Operations on one plugin are serialized through a per-entry
/// lock; a second concurrent operation is rejected, not queued.
pub struct LifecycleManager {
    config: LifecycleConfig,
    host: Arc<dyn IsolateHost>,
    bus: Arc<dyn Bus>,
    broker: Arc<CapabilityBroker>,
    monitor: Arc<HealthMonitor>,
    store: Arc<dyn Store>,
    health_tx: mpsc::Sender<(PluginId, HealthReportPayload)>,
    plugins: Mutex<HashMap<PluginId, Arc<Mutex<Entry>>>>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LifecycleConfig,
        host: Arc<dyn IsolateHost>,
        bus: Arc<dyn Bus>,
        broker: Arc<CapabilityBroker>,
        monitor: Arc<HealthMonitor>,
        store: Arc<dyn Store>,
        health_tx: mpsc::Sender<(PluginId, HealthReportPayload)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            bus,
            broker,
            monitor,
            store,
            health_tx,
            plugins: Mutex::new(HashMap::new()),
        })
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub async fn snapshot(&self, plugin_id: &PluginId) -> Option<PluginSnapshot> {
        let entry = self.entry(plugin_id).await.ok()?;
        let guard = entry.lock().await;
        Some(guard.snapshot(plugin_id))
    }

    pub async fn list_snapshots(&self) -> Vec<PluginSnapshot> {
        let entries: Vec<(PluginId, Arc<Mutex<Entry>>)> = {
            let plugins = self.plugins.lock().await;
            plugins.iter().map(|(id, e)| (id.clone(), e.clone())).collect()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for (plugin_id, entry) in entries {
            let guard = entry.lock().await;
            snapshots.push(guard.snapshot(&plugin_id));
        }
        snapshots.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        snapshots
    }

    /// Every loaded plugin exporting `capability`, with its current state.
    pub async fn capability_providers(
        &self,
        capability: &str,
    ) -> Vec<(PluginId, LifecycleState)> {
        let entries: Vec<(PluginId, Arc<Mutex<Entry>>)> = {
            let plugins = self.plugins.lock().await;
            plugins.iter().map(|(id, e)| (id.clone(), e.clone())).collect()
        };
        let mut providers = Vec::new();
        for (plugin_id, entry) in entries {
            let guard = entry.lock().await;
            if guard.manifest.exports_capability(capability) {
                providers.push((plugin_id, guard.state));
            }
        }
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        providers
    }

    /// RUNNING plugins whose manifest exports `capability`.
    pub async fn running_providers(&self, capability: &str) -> Vec<PluginId> {
        let entries: Vec<(PluginId, Arc<Mutex<Entry>>)> = {
            let plugins = self.plugins.lock().await;
            plugins.iter().map(|(id, e)| (id.clone(), e.clone())).collect()
        };
        let mut providers = Vec::new();
        for (plugin_id, entry) in entries {
            let guard = entry.lock().await;
            if guard.state == LifecycleState::Running
                && guard.manifest.exports_capability(capability)
            {
                providers.push(plugin_id);
            }
        }
        providers.sort();
        providers
    }

    /// Invoke an exported capability on a RUNNING plugin's isolate.
    pub async fn invoke_capability(
        &self,
        plugin_id: &PluginId,
        method: &str,
        params: Value,
        trace_id: Option<String>,
    ) -> Result<Value, RuntimeError> {
        let entry = self.entry(plugin_id).await?;
        let client = {
            let guard = entry.lock().await;
            if guard.state != LifecycleState::Running {
                return Err(RuntimeError::IllegalTransition {
                    plugin_id: plugin_id.clone(),
                    from: guard.state,
                    to: LifecycleState::Running,
                });
            }
            guard.client.clone().ok_or_else(|| RuntimeError::UnknownPlugin(plugin_id.clone()))?
        };
        client
            .invoke(method, params, trace_id)
            .await
            .map_err(|source| RuntimeError::Isolate { plugin_id: plugin_id.clone(), source })
    }

    // ── Load / unload ─────────────────────────────────────────────────────────

    /// Register a validated manifest. The config version continues from
    /// the persisted plugin record when one exists.
    pub async fn load(
        &self,
        manifest: PluginManifest,
        config: Value,
    ) -> Result<(), RuntimeError> {
        let plugin_id = manifest.id.clone();
        let entry_path =
            self.config.base_path.join(plugin_id.as_str()).join(&manifest.entry);

        let existing = self.store.get_plugin(&plugin_id).await?;
        let config_version = existing.as_ref().map(|r| r.config_version).unwrap_or(0);
        let now = now_ms();
        self.store
            .upsert_plugin(&PluginRecord {
                plugin_id: plugin_id.clone(),
                version: manifest.version.clone(),
                config_version,
                config: config.clone(),
                installed_at: existing.map(|r| r.installed_at).unwrap_or(now),
                updated_at: now,
            })
            .await?;

        let mut plugins = self.plugins.lock().await;
        plugins.insert(
            plugin_id.clone(),
            Arc::new(Mutex::new(Entry {
                manifest: Arc::new(manifest),
                state: LifecycleState::Loaded,
                config,
                config_version,
                entry_path,
                client: None,
                bridge: None,
                started_at: None,
                stopped_at: None,
                error_last: None,
            })),
        );
        info!(plugin_id = %plugin_id, "plugin loaded");
        Ok(())
    }

    // ── Init ──────────────────────────────────────────────────────────────────

    pub async fn init(&self, plugin_id: &PluginId) -> Result<(), RuntimeError> {
        let entry = self.entry(plugin_id).await?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| RuntimeError::OperationInProgress(plugin_id.clone()))?;

        self.transition(plugin_id, &mut guard, LifecycleState::Initializing)?;

        let spec = IsolateSpec {
            isolate_id: IsolateId::generate(),
            manifest: (*guard.manifest).clone(),
            entry_path: guard.entry_path.clone(),
        };
        let handle = match self.host.spawn(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                guard.state = LifecycleState::InitError;
                guard.error_last = Some(e.to_string());
                return Err(RuntimeError::Isolate { plugin_id: plugin_id.clone(), source: e });
            }
        };
        let client = IsolateClient::new(
            handle,
            guard.manifest.clone(),
            self.broker.clone(),
            self.health_tx.clone(),
            self.config.invoke_timeout,
        );

        match client.invoke(HOOK_ON_INIT, json!({"hasContext": true}), None).await {
            Ok(_) => {
                guard.client = Some(client);
                guard.error_last = None;
                debug!(plugin_id = %plugin_id, "plugin initialized");
                Ok(())
            }
            Err(e) => {
                let isolate_id = client.isolate_id().clone();
                client.shutdown();
                let _ = self.host.destroy(&isolate_id).await;
                guard.state = LifecycleState::InitError;
                guard.error_last = Some(e.to_string());
                Err(RuntimeError::HookFailed {
                    plugin_id: plugin_id.clone(),
                    hook: HOOK_ON_INIT.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    // ── Start ─────────────────────────────────────────────────────────────────

    pub async fn start(&self, plugin_id: &PluginId) -> Result<StartOutcome, RuntimeError> {
        let entry = self.entry(plugin_id).await?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| RuntimeError::OperationInProgress(plugin_id.clone()))?;

        self.transition(plugin_id, &mut guard, LifecycleState::Starting)?;
        let client = guard
            .client
            .clone()
            .ok_or_else(|| RuntimeError::UnknownPlugin(plugin_id.clone()))?;

        if let Err(e) = client.invoke(HOOK_ON_START, json!({}), None).await {
            guard.state = LifecycleState::StartError;
            guard.error_last = Some(e.to_string());
            return Err(RuntimeError::HookFailed {
                plugin_id: plugin_id.clone(),
                hook: HOOK_ON_START.to_string(),
                reason: e.to_string(),
            });
        }

        let (bridge, denials) =
            EventBridge::connect(&guard.manifest, self.bus.clone(), client.sender())
                .await
                .map_err(|source| RuntimeError::Isolate {
                    plugin_id: plugin_id.clone(),
                    source,
                })?;
        guard.bridge = Some(bridge);

        self.monitor.watch(plugin_id.clone(), client).await;

        guard.state = LifecycleState::Running;
        guard.started_at = Some(now_ms());
        guard.error_last = None;
        info!(plugin_id = %plugin_id, "plugin running");
        Ok(StartOutcome { denials })
    }

    // ── Stop ──────────────────────────────────────────────────────────────────

    /// Graceful stop with forced termination after the timeout. Stopping
    /// a STOPPED plugin is a no-op.
    pub async fn stop(&self, plugin_id: &PluginId) -> Result<(), RuntimeError> {
        let entry = self.entry(plugin_id).await?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| RuntimeError::OperationInProgress(plugin_id.clone()))?;

        if guard.state == LifecycleState::Stopped {
            return Ok(());
        }
        self.transition(plugin_id, &mut guard, LifecycleState::Stopping)?;

        if let Some(bridge) = guard.bridge.take() {
            bridge.shutdown();
        }
        self.monitor.unwatch(plugin_id).await;

        if let Some(client) = guard.client.take() {
            client.terminate().await;
            match tokio::time::timeout(
                self.config.stop_timeout,
                client.invoke(HOOK_ON_STOP, json!({}), None),
            )
            .await
            {
                Ok(Ok(_)) => debug!(plugin_id = %plugin_id, "plugin stopped gracefully"),
                Ok(Err(e)) => {
                    warn!(plugin_id = %plugin_id, error = %e, "onStop failed; forcing termination")
                }
                Err(_) => {
                    warn!(plugin_id = %plugin_id, "onStop timed out; forcing termination")
                }
            }
            let isolate_id = client.isolate_id().clone();
            client.shutdown();
            let _ = self.host.destroy(&isolate_id).await;
        }

        guard.state = LifecycleState::Stopped;
        guard.stopped_at = Some(now_ms());
        info!(plugin_id = %plugin_id, "plugin stopped");
        Ok(())
    }

    // ── Destroy ───────────────────────────────────────────────────────────────

    pub async fn destroy(&self, plugin_id: &PluginId) -> Result<(), RuntimeError> {
        {
            let entry = self.entry(plugin_id).await?;
            let mut guard = entry
                .try_lock()
                .map_err(|_| RuntimeError::OperationInProgress(plugin_id.clone()))?;
            self.transition(plugin_id, &mut guard, LifecycleState::Destroyed)?;
        }
        self.plugins.lock().await.remove(plugin_id);
        info!(plugin_id = %plugin_id, "plugin destroyed");
        Ok(())
    }

    // ── Reload (blue/green) ───────────────────────────────────────────────────

    /// Bring up a second isolate, initialize and start it within the
    /// reload timeout, persist the bumped config version, then swap
    /// traffic. On any failure the pending isolate is destroyed and the
    /// old isolate keeps serving; traffic never moved.
    pub async fn reload(
        &self,
        plugin_id: &PluginId,
        new_config: Option<Value>,
    ) -> Result<u64, RuntimeError> {
        let entry = self.entry(plugin_id).await?;
        let mut guard = entry
            .try_lock()
            .map_err(|_| RuntimeError::OperationInProgress(plugin_id.clone()))?;

        if guard.state != LifecycleState::Running || guard.client.is_none() {
            return Err(RuntimeError::IllegalTransition {
                plugin_id: plugin_id.clone(),
                from: guard.state,
                to: LifecycleState::Reloading,
            });
        }
        guard.state = LifecycleState::Reloading;
        info!(plugin_id = %plugin_id, "reload started");

        let pending_spec = IsolateSpec {
            isolate_id: IsolateId::generate(),
            manifest: (*guard.manifest).clone(),
            entry_path: guard.entry_path.clone(),
        };
        let pending_id = pending_spec.isolate_id.clone();

        let startup = self.bring_up_pending(&mut guard, pending_spec).await;
        let pending_client = match startup {
            Ok(client) => client,
            Err(reason) => {
                // Rollback: the pending isolate is gone, traffic never moved.
                let _ = self.host.destroy(&pending_id).await;
                guard.state = LifecycleState::Running;
                guard.error_last = Some(reason.clone());
                warn!(plugin_id = %plugin_id, %reason, "reload rolled back");
                return Err(RuntimeError::ReloadFailed { plugin_id: plugin_id.clone(), reason });
            }
        };

        // Prepare the new bridge while the old one keeps serving. A
        // failure here is still a clean rollback: nothing was persisted.
        let bridge =
            match EventBridge::connect(&guard.manifest, self.bus.clone(), pending_client.sender())
                .await
            {
                Ok((bridge, _denials)) => bridge,
                Err(e) => {
                    let pending_isolate = pending_client.isolate_id().clone();
                    pending_client.shutdown();
                    let _ = self.host.destroy(&pending_isolate).await;
                    guard.state = LifecycleState::Running;
                    guard.error_last = Some(e.to_string());
                    return Err(RuntimeError::ReloadFailed {
                        plugin_id: plugin_id.clone(),
                        reason: format!("event bridge rebind failed: {e}"),
                    });
                }
            };

        // Persist the new version; only after this does traffic move.
        let next_version = guard.config_version + 1;
        let config = new_config.unwrap_or_else(|| guard.config.clone());
        let installed_at = self
            .store
            .get_plugin(plugin_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.installed_at)
            .unwrap_or_else(now_ms);
        let record = PluginRecord {
            plugin_id: plugin_id.clone(),
            version: guard.manifest.version.clone(),
            config_version: next_version,
            config: config.clone(),
            installed_at,
            updated_at: now_ms(),
        };
        if let Err(e) = self.store.upsert_plugin(&record).await {
            bridge.shutdown();
            let pending_isolate = pending_client.isolate_id().clone();
            pending_client.shutdown();
            let _ = self.host.destroy(&pending_isolate).await;
            guard.state = LifecycleState::Running;
            guard.error_last = Some(e.to_string());
            return Err(RuntimeError::ReloadFailed {
                plugin_id: plugin_id.clone(),
                reason: format!("config version persist failed: {e}"),
            });
        }

        // Swap the active references and retire the old worker.
        if let Some(old_bridge) = guard.bridge.take() {
            old_bridge.shutdown();
        }
        guard.bridge = Some(bridge);

        let old_client = guard.client.replace(pending_client.clone());
        self.monitor.swap_client(plugin_id, pending_client).await;

        if let Some(old_client) = old_client {
            let _ = tokio::time::timeout(
                self.config.stop_timeout,
                old_client.invoke(HOOK_ON_STOP, json!({}), None),
            )
            .await;
            let old_isolate = old_client.isolate_id().clone();
            old_client.shutdown();
            let _ = self.host.destroy(&old_isolate).await;
        }

        guard.config = config;
        guard.config_version = next_version;
        guard.state = LifecycleState::Running;
        guard.error_last = None;
        info!(plugin_id = %plugin_id, config_version = next_version, "reload committed");
        Ok(next_version)
    }

    async fn bring_up_pending(
        &self,
        guard: &mut Entry,
        spec: IsolateSpec,
    ) -> Result<Arc<IsolateClient>, String> {
        let startup = async {
            let handle = self.host.spawn(spec).await.map_err(|e| e.to_string())?;
            let client = IsolateClient::new(
                handle,
                guard.manifest.clone(),
                self.broker.clone(),
                self.health_tx.clone(),
                self.config.invoke_timeout,
            );
            client
                .invoke(HOOK_ON_INIT, json!({"reload": true}), None)
                .await
                .map_err(|e| e.to_string())?;
            client
                .invoke(HOOK_ON_START, json!({"reload": true}), None)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(client)
        };

        match tokio::time::timeout(self.config.reload_timeout, startup).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err("pending worker startup timed out".to_string()),
        }
    }

    // ── Supervision ───────────────────────────────────────────────────────────

    /// Consume monitor events and restart the affected plugin: stop,
    /// destroy, load, init, start. A supervisor action, not a lifecycle
    /// transition.
    pub async fn supervise(self: Arc<Self>, mut events: mpsc::Receiver<HealthEvent>) {
        while let Some(event) = events.recv().await {
            let plugin_id = match &event {
                HealthEvent::Unresponsive(id) | HealthEvent::MemoryExceeded(id) => id.clone(),
            };
            warn!(plugin_id = %plugin_id, ?event, "supervised restart triggered");
            if let Err(e) = self.restart(&plugin_id).await {
                warn!(plugin_id = %plugin_id, error = %e, "supervised restart failed");
            }
        }
    }

    pub async fn restart(&self, plugin_id: &PluginId) -> Result<(), RuntimeError> {
        let (manifest, config) = {
            let entry = self.entry(plugin_id).await?;
            let guard = entry.lock().await;
            ((*guard.manifest).clone(), guard.config.clone())
        };
        self.stop(plugin_id).await?;
        self.destroy(plugin_id).await?;
        self.load(manifest, config).await?;
        self.init(plugin_id).await?;
        self.start(plugin_id).await?;
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn entry(&self, plugin_id: &PluginId) -> Result<Arc<Mutex<Entry>>, RuntimeError> {
        self.plugins
            .lock()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownPlugin(plugin_id.clone()))
    }

    fn transition(
        &self,
        plugin_id: &PluginId,
        guard: &mut Entry,
        to: LifecycleState,
    ) -> Result<(), RuntimeError> {
        if !guard.state.can_transition_to(to) {
            return Err(RuntimeError::IllegalTransition {
                plugin_id: plugin_id.clone(),
                from: guard.state,
                to,
            });
        }
        debug!(plugin_id = %plugin_id, from = %guard.state, to = %to, "lifecycle transition");
        guard.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::testutil::{test_manifest, FakeHost, ScriptedBehavior};
    use meristem_bus::MemoryBus;
    use meristem_store::MemoryStore;

    struct Rig {
        manager: Arc<LifecycleManager>,
        host: Arc<FakeHost>,
        store: Arc<MemoryStore>,
        plugin_id: PluginId,
    }

    async fn rig(behaviors: Vec<ScriptedBehavior>) -> Rig {
        let host = FakeHost::new(behaviors);
        let store = Arc::new(MemoryStore::new());
        let (monitor, _events) = HealthMonitor::new(HealthConfig::default());
        let (health_tx, _health_rx) = mpsc::channel(64);
        let manager = LifecycleManager::new(
            LifecycleConfig {
                stop_timeout: Duration::from_millis(200),
                reload_timeout: Duration::from_millis(800),
                invoke_timeout: Duration::from_millis(400),
                ..Default::default()
            },
            host.clone(),
            Arc::new(MemoryBus::new()),
            CapabilityBroker::new(),
            monitor,
            store.clone(),
            health_tx,
        );
        let plugin_id = PluginId::new("io.m.relay");
        manager.load(test_manifest("io.m.relay"), json!({})).await.unwrap();
        Rig { manager, host, store, plugin_id }
    }

    async fn state_of(rig: &Rig) -> LifecycleState {
        rig.manager.snapshot(&rig.plugin_id).await.unwrap().state
    }

    #[tokio::test]
    async fn full_lifecycle_happy_path() {
        let rig = rig(vec![]).await;
        assert_eq!(state_of(&rig).await, LifecycleState::Loaded);

        rig.manager.init(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Initializing);

        rig.manager.start(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Running);

        rig.manager.stop(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Stopped);

        rig.manager.destroy(&rig.plugin_id).await.unwrap();
        assert!(rig.manager.snapshot(&rig.plugin_id).await.is_none());
    }

    #[tokio::test]
    async fn illegal_transition_names_the_pair() {
        let rig = rig(vec![]).await;
        let err = rig.manager.start(&rig.plugin_id).await.unwrap_err();
        match err {
            RuntimeError::IllegalTransition { from, to, .. } => {
                assert_eq!(from, LifecycleState::Loaded);
                assert_eq!(to, LifecycleState::Starting);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn init_failure_lands_in_init_error_and_is_retryable() {
        let rig = rig(vec![
            ScriptedBehavior { fail_on_init: true, ..Default::default() },
            ScriptedBehavior::default(),
        ])
        .await;

        let err = rig.manager.init(&rig.plugin_id).await.unwrap_err();
        assert!(matches!(err, RuntimeError::HookFailed { .. }));
        assert_eq!(state_of(&rig).await, LifecycleState::InitError);

        // Error states permit retrying the originating transition.
        rig.manager.init(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Initializing);
    }

    #[tokio::test]
    async fn start_failure_lands_in_start_error() {
        let rig = rig(vec![ScriptedBehavior { fail_on_start: true, ..Default::default() }]).await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        let err = rig.manager.start(&rig.plugin_id).await.unwrap_err();
        assert!(matches!(err, RuntimeError::HookFailed { .. }));
        assert_eq!(state_of(&rig).await, LifecycleState::StartError);
    }

    #[tokio::test]
    async fn stop_timeout_forces_termination() {
        let rig = rig(vec![ScriptedBehavior { hang_on_stop: true, ..Default::default() }]).await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        rig.manager.start(&rig.plugin_id).await.unwrap();
        let isolate_id =
            rig.manager.snapshot(&rig.plugin_id).await.unwrap().isolate_id.unwrap();

        rig.manager.stop(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Stopped);
        assert_eq!(rig.host.destroy_count(&isolate_id).await, 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_stopped() {
        let rig = rig(vec![]).await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        rig.manager.start(&rig.plugin_id).await.unwrap();
        rig.manager.stop(&rig.plugin_id).await.unwrap();
        rig.manager.stop(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn reload_commit_bumps_config_version_and_swaps_isolate() {
        let rig = rig(vec![]).await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        rig.manager.start(&rig.plugin_id).await.unwrap();
        let before = rig.manager.snapshot(&rig.plugin_id).await.unwrap();
        assert_eq!(before.config_version, 0);
        let old_isolate = before.isolate_id.unwrap();

        let version = rig.manager.reload(&rig.plugin_id, Some(json!({"k": 2}))).await.unwrap();
        assert_eq!(version, 1);

        let after = rig.manager.snapshot(&rig.plugin_id).await.unwrap();
        assert_eq!(after.state, LifecycleState::Running);
        assert_eq!(after.config_version, 1);
        assert_ne!(after.isolate_id.unwrap(), old_isolate);
        assert_eq!(rig.host.destroy_count(&old_isolate).await, 1);

        let record = rig.store.get_plugin(&rig.plugin_id).await.unwrap().unwrap();
        assert_eq!(record.config_version, 1);
    }

    #[tokio::test]
    async fn reload_rollback_keeps_old_worker_serving() {
        let rig = rig(vec![
            ScriptedBehavior::default(),
            ScriptedBehavior { fail_on_start: true, ..Default::default() },
        ])
        .await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        rig.manager.start(&rig.plugin_id).await.unwrap();
        let old_isolate =
            rig.manager.snapshot(&rig.plugin_id).await.unwrap().isolate_id.unwrap();

        let err = rig.manager.reload(&rig.plugin_id, None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ReloadFailed { .. }));

        let after = rig.manager.snapshot(&rig.plugin_id).await.unwrap();
        assert_eq!(after.state, LifecycleState::Running);
        assert_eq!(after.config_version, 0, "failed reload must not bump the version");
        assert_eq!(after.isolate_id.unwrap(), old_isolate, "traffic never moved");
        assert!(after.error_last.is_some());

        // Old worker still answers invocations.
        let data = rig
            .manager
            .invoke_capability(&rig.plugin_id, "echo", json!({}), None)
            .await
            .unwrap();
        assert_eq!(data["method"], "echo");

        // Exactly one pending isolate was spawned and destroyed once.
        let spawned = rig.host.spawned.lock().await.clone();
        assert_eq!(spawned.len(), 2);
        assert_eq!(rig.host.destroy_count(&spawned[1]).await, 1);

        // Persisted version unchanged.
        let record = rig.store.get_plugin(&rig.plugin_id).await.unwrap().unwrap();
        assert_eq!(record.config_version, 0);
    }

    #[tokio::test]
    async fn reload_requires_running_state() {
        let rig = rig(vec![]).await;
        let err = rig.manager.reload(&rig.plugin_id, None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn restart_cycles_back_to_running() {
        let rig = rig(vec![]).await;
        rig.manager.init(&rig.plugin_id).await.unwrap();
        rig.manager.start(&rig.plugin_id).await.unwrap();
        rig.manager.restart(&rig.plugin_id).await.unwrap();
        assert_eq!(state_of(&rig).await, LifecycleState::Running);
    }

    #[tokio::test]
    async fn providers_reflect_running_exports() {
        let rig = rig(vec![]).await;
        let mut manifest = test_manifest("io.m.netplugin");
        manifest.exports.insert("network-mode-status".to_string());
        rig.manager.load(manifest, json!({})).await.unwrap();
        let provider_id = PluginId::new("io.m.netplugin");

        assert!(rig.manager.running_providers("network-mode-status").await.is_empty());
        rig.manager.init(&provider_id).await.unwrap();
        rig.manager.start(&provider_id).await.unwrap();
        assert_eq!(
            rig.manager.running_providers("network-mode-status").await,
            vec![provider_id]
        );
    }
}
