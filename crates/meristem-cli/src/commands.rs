use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use meristem_api::{build_app, AppState, AuthKeys, Fanout};
use meristem_audit::{AuditPipeline, PipelineConfig};
use meristem_bus::{Bus, MemoryBus};
use meristem_config::{load_config, CoreConfig, RuntimeMode};
use meristem_control::{
    IngestService, NetworkModeManager, NetworkModeOptions, NodeMonitor, NodeMonitorConfig,
    ShutdownLifecycle, TaskService, TaskServiceConfig,
};
use meristem_domain::{now_ms, NodeId};
use meristem_isolate::{CapabilityBroker, ProcessHost};
use meristem_log::{BusTransport, TransportConfig};
use meristem_runtime::{HealthConfig, HealthMonitor, LifecycleConfig, LifecycleManager};
use meristem_store::{MemoryStore, Store};
use tracing::{info, warn};

use crate::output;
use crate::registry::{
    check_installed, load_cache, load_installed, resolve_install, store_cache, store_installed,
    InstalledPlugin, RegistryIndex,
};

/// Short stable id derived from a secret, used as the JWT key id without
/// persisting the secret itself.
fn short_digest(secret: &str) -> String {
    meristem_audit::sha256_hex(secret.as_bytes())[..8].to_string()
}

pub fn resolve_home(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| PathBuf::from(".meristem"))
}

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(
    home: PathBuf,
    config_path: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref()).context("loading config")?;
    if let Some(bind) = bind {
        config.http.bind = bind;
    }
    if let Some(port) = port {
        config.http.port = port;
    }
    if config.runtime_mode == RuntimeMode::Connected {
        warn!("connected runtime mode: external store/bus drivers attach here; using in-process fallbacks");
    }

    let node_id = NodeId::new(format!("core-{}", short_digest(&config.http.bind)));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());

    // Log transport: byte-capped ring into the bus log subjects.
    let transport = BusTransport::new(TransportConfig {
        max_msg_bytes: config.nats.stream.max_msg_size as usize,
        ..TransportConfig::default()
    });
    let transport_task = tokio::spawn(transport.clone().run(bus.clone()));

    // Audit pipeline.
    let pipeline = AuditPipeline::new(
        store_dyn.clone(),
        PipelineConfig {
            hmac_secret: config.audit.hmac_secret.clone(),
            hmac_key_id: config.audit.hmac_key_id.clone(),
            partition_count: config.audit.partition_count,
            batch_size: config.audit.batch_size,
            lease_duration_ms: config.audit.lease_duration_ms,
            max_retry_attempts: config.audit.max_retry_attempts,
            backlog_hard_limit: config.audit.backlog_hard_limit,
            drain_interval: std::time::Duration::from_millis(config.audit.drain_interval_ms),
            anchor_interval: std::time::Duration::from_millis(config.audit.anchor_interval_ms),
        },
        node_id.as_str(),
    );
    pipeline.start().await.context("starting audit pipeline")?;
    let pipeline_task = tokio::spawn(pipeline.clone().run());

    // Plugin runtime.
    let (monitor, health_events) = HealthMonitor::new(HealthConfig {
        ping_interval: std::time::Duration::from_millis(config.plugins.ping_interval_ms),
        pong_timeout_ms: config.plugins.pong_timeout_ms as i64,
        max_consecutive_failures: config.plugins.max_consecutive_failures,
        memory_threshold_bytes: config.plugins.memory_threshold_bytes,
    });
    let (health_tx, health_rx) = tokio::sync::mpsc::channel(256);
    let monitor_task = tokio::spawn(monitor.clone().run(health_rx));

    let broker = CapabilityBroker::new();
    {
        let bus = bus.clone();
        broker
            .register(
                "bus.publish",
                meristem_domain::Permission::NatsPub,
                Arc::new(move |params| {
                    let bus = bus.clone();
                    Box::pin(async move {
                        let subject = params
                            .get("subject")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| "missing 'subject'".to_string())?
                            .to_string();
                        let payload = params.get("payload").cloned().unwrap_or_default();
                        let bytes =
                            serde_json::to_vec(&payload).map_err(|e| e.to_string())?;
                        bus.publish(&subject, bytes).await.map_err(|e| e.to_string())?;
                        Ok(serde_json::json!({"published": subject}))
                    })
                }),
            )
            .await;
    }

    let host = Arc::new(ProcessHost::new(&config.plugins.runtime_cmd));
    let lifecycle = LifecycleManager::new(
        LifecycleConfig {
            base_path: PathBuf::from(&config.plugins.base_path),
            stop_timeout: std::time::Duration::from_millis(config.plugins.stop_timeout_ms),
            reload_timeout: std::time::Duration::from_millis(config.plugins.reload_timeout_ms),
            invoke_timeout: std::time::Duration::from_millis(config.plugins.invoke_timeout_ms),
        },
        host,
        bus.clone(),
        broker,
        monitor.clone(),
        store_dyn.clone(),
        health_tx,
    );
    let supervisor_task = tokio::spawn(lifecycle.clone().supervise(health_events));

    bring_up_installed(&home, &lifecycle).await;

    // Ingest and node monitoring.
    let ingest = IngestService::new(store_dyn.clone(), node_id.clone(), Some(transport.clone()));
    let ingest_tasks = ingest.spawn_subscriptions(bus.clone());
    let node_monitor = NodeMonitor::new(
        store_dyn.clone(),
        NodeMonitorConfig {
            offline_cutoff_ms: config.heartbeat.offline_cutoff_ms,
            interval: std::time::Duration::from_millis(config.heartbeat.monitor_interval_ms),
        },
    );
    let node_monitor_task = tokio::spawn(node_monitor.run());

    // Fanout + network mode.
    let fanout = Fanout::new();
    let netmode = NetworkModeManager::new(
        lifecycle.clone(),
        monitor,
        bus.clone(),
        Some(fanout.clone()),
        NetworkModeOptions {
            poll_interval: std::time::Duration::from_millis(config.network_mode.poll_interval_ms),
            fallback_to_direct: config.network_mode.fallback_to_direct,
        },
    );
    let netmode_task = tokio::spawn(netmode.run());

    // HTTP surface.
    let tasks = TaskService::new(store_dyn.clone(), pipeline.clone(), TaskServiceConfig::default());
    let key_id = meristem_api::auth::resolve_key_id(
        &home,
        &short_digest(&config.security.jwt_sign_secret),
    );
    let state = AppState {
        store: store_dyn.clone(),
        tasks,
        pipeline: pipeline.clone(),
        fanout,
        auth: Arc::new(AuthKeys {
            sign_secret: config.security.jwt_sign_secret.clone(),
            verify_secrets: config.security.jwt_verify_secrets.clone(),
            key_id,
            token_ttl_seconds: 3600,
        }),
        metrics: Arc::new(meristem_api::metrics::Metrics::new()),
        transport: Some(transport.clone()),
        node_id: node_id.clone(),
        bootstrap_token: Arc::new(config.security.bootstrap_token.clone()),
    };
    let app = build_app(state, &config.websocket.path);

    // Shutdown lifecycle: registered store-first so LIFO tears down
    // heartbeat monitor, network mode, audit, bus, store, in that order.
    let shutdown = ShutdownLifecycle::new();
    {
        // The in-memory store holds nothing durable; the external driver
        // hooks its close here.
        let store = store.clone();
        shutdown
            .register("store close", move || async move {
                drop(store);
                Ok(())
            })
            .await;
    }
    {
        let bus = bus.clone();
        shutdown
            .register("bus close", move || async move {
                bus.close().await.map_err(|e| e.to_string())
            })
            .await;
    }
    {
        let pipeline = pipeline.clone();
        let transport = transport.clone();
        shutdown
            .register("audit pipeline stop", move || async move {
                transport.stop();
                pipeline_task.abort();
                transport_task.abort();
                pipeline.flush_and_stop().await.map_err(|e| e.to_string())
            })
            .await;
    }
    shutdown
        .register("network mode stop", move || async move {
            netmode_task.abort();
            Ok(())
        })
        .await;
    shutdown
        .register("heartbeat monitor stop", move || async move {
            node_monitor_task.abort();
            monitor_task.abort();
            supervisor_task.abort();
            for task in ingest_tasks {
                task.abort();
            }
            Ok(())
        })
        .await;

    let addr = format!("{}:{}", config.http.bind, config.http.port);
    info!(%addr, node_id = %node_id, "meristem core listening");
    println!("meristem core listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    let failed = shutdown.run().await;
    if !failed.is_empty() {
        warn!(?failed, "some shutdown tasks failed");
    }
    Ok(())
}

/// Load, init and start every installed plugin in dependency order.
/// Failures are logged per plugin and never abort the core.
async fn bring_up_installed(home: &Path, lifecycle: &Arc<LifecycleManager>) {
    let db = match load_installed(home) {
        Ok(db) => db,
        Err(e) => {
            warn!(error = %e, "installed plugin database unreadable");
            return;
        }
    };
    if db.plugins.is_empty() {
        return;
    }

    let set: std::collections::HashMap<_, _> = db
        .plugins
        .iter()
        .map(|p| (p.manifest.id.clone(), p.manifest.clone()))
        .collect();
    let ordered = match meristem_graph::topo_order(&set).into_result() {
        Ok(order) => order,
        Err(e) => {
            warn!(error = %e, "installed plugin set is not loadable");
            return;
        }
    };

    for plugin_id in ordered {
        let manifest = set[&plugin_id].clone();
        if let Err(e) = lifecycle.load(manifest, serde_json::json!({})).await {
            warn!(plugin_id = %plugin_id, error = %e, "plugin load failed");
            continue;
        }
        if let Err(e) = lifecycle.init(&plugin_id).await {
            warn!(plugin_id = %plugin_id, error = %e, "plugin init failed");
            continue;
        }
        match lifecycle.start(&plugin_id).await {
            Ok(outcome) => {
                for denial in outcome.denials {
                    warn!(plugin_id = %plugin_id, %denial, "event subscription denied");
                }
                info!(plugin_id = %plugin_id, "plugin started");
            }
            Err(e) => warn!(plugin_id = %plugin_id, error = %e, "plugin start failed"),
        }
    }
}

// ── Plugin operations ─────────────────────────────────────────────────────────

pub async fn refresh_registry(home: &Path, registry_url: Option<&str>) -> Result<()> {
    let Some(url) = registry_url else {
        bail!("--registry-url (or MERISTEM_REGISTRY_URL) is required for -Sy");
    };
    let index: RegistryIndex = reqwest::get(url)
        .await
        .with_context(|| format!("fetching {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("decoding registry index")?;
    store_cache(home, &index)?;
    println!("registry refreshed: {} plugins available", index.entries.len());
    Ok(())
}

pub fn search(home: &Path, keywords: &[String]) -> Result<()> {
    let index = load_cache(home)?;
    let matches: Vec<_> = index
        .entries
        .iter()
        .filter(|entry| {
            keywords.is_empty()
                || keywords.iter().any(|kw| {
                    entry.manifest.id.as_str().contains(kw.as_str())
                        || entry.description.contains(kw.as_str())
                })
        })
        .collect();
    print!("{}", output::render_registry(&matches));
    Ok(())
}

pub fn install(
    home: &Path,
    targets: &[String],
    reference: Option<&str>,
    required_only: bool,
) -> Result<()> {
    let index = load_cache(home)?;
    let targets: Vec<String> = if required_only {
        index
            .entries
            .iter()
            .filter(|e| e.required)
            .map(|e| e.manifest.id.to_string())
            .collect()
    } else {
        targets.to_vec()
    };
    if targets.is_empty() {
        bail!("nothing to install: no targets given and no required plugins in registry");
    }

    let resolved = resolve_install(&index, &targets, reference)?;
    let mut db = load_installed(home)?;
    for entry in &resolved {
        db.plugins.retain(|p| p.manifest.id != entry.manifest.id);
        db.plugins.push(InstalledPlugin {
            manifest: entry.manifest.clone(),
            reference: entry.reference.clone(),
            installed_at: now_ms(),
        });
        println!("installed {} @ {}", entry.manifest.id, entry.reference);
    }
    store_installed(home, &db)?;
    Ok(())
}

pub fn upgrade(home: &Path) -> Result<()> {
    let index = load_cache(home)?;
    let mut db = load_installed(home)?;
    let mut upgraded = 0usize;
    for installed in &mut db.plugins {
        let newer = index.entries.iter().find(|e| {
            e.manifest.id == installed.manifest.id
                && (e.manifest.version != installed.manifest.version
                    || e.reference != installed.reference)
        });
        if let Some(entry) = newer {
            println!(
                "upgrading {}: {} -> {}",
                installed.manifest.id, installed.manifest.version, entry.manifest.version
            );
            installed.manifest = entry.manifest.clone();
            installed.reference = entry.reference.clone();
            installed.installed_at = now_ms();
            upgraded += 1;
        }
    }
    store_installed(home, &db)?;
    println!("{upgraded} plugin(s) upgraded");
    Ok(())
}

pub fn query_installed(home: &Path) -> Result<()> {
    let db = load_installed(home)?;
    print!("{}", output::render_installed(&db.plugins));
    Ok(())
}

pub fn query_check(home: &Path, config_path: Option<&Path>) -> Result<()> {
    let config: CoreConfig = load_config(config_path).context("loading config")?;
    let db = load_installed(home)?;
    let problems = check_installed(&db, Path::new(&config.plugins.base_path));
    if problems.is_empty() {
        println!("{} plugin(s) ok", db.plugins.len());
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("problem: {problem}");
        }
        bail!("{} problem(s) found", problems.len());
    }
}
