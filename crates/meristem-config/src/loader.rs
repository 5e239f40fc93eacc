use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

// ── Resolved config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// In-process bus and store; no external services required.
    Standalone,
    /// External NATS and document store.
    Connected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub mongo_uri: String,
    pub query_max_time_ms: u64,
}

/// Settings for the `MERISTEM_LOGS` stream: retention=limits, discard=old.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub replicas: u32,
    pub max_bytes: i64,
    pub max_age_ns: i64,
    pub duplicate_window_secs: u64,
    pub max_msg_size: u32,
    /// Account-level storage limit, when known. `None` = unlimited.
    pub account_max_storage: Option<i64>,
}

impl StreamConfig {
    /// Effective `max_bytes`: when the account limit is lower than the
    /// configured value, clamp to 80% of available account storage divided
    /// by the replica count.
    pub fn effective_max_bytes(&self) -> i64 {
        match self.account_max_storage {
            Some(account) if account < self.max_bytes => {
                (account * 8 / 10) / i64::from(self.replicas.max(1))
            }
            _ => self.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub token: Option<String>,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_sign_secret: String,
    /// Superset of the sign secret; every entry is tried on verification.
    pub jwt_verify_secrets: Vec<String>,
    pub jwt_rotation_grace_seconds: u64,
    pub plugin_secret: String,
    pub bootstrap_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub hmac_secret: String,
    pub hmac_key_id: String,
    pub partition_count: u32,
    pub batch_size: u32,
    pub lease_duration_ms: u64,
    pub max_retry_attempts: u32,
    pub backlog_hard_limit: u64,
    pub anchor_interval_ms: u64,
    pub drain_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    pub base_path: String,
    /// Command used to host a plugin isolate; receives the entry path.
    pub runtime_cmd: String,
    pub stop_timeout_ms: u64,
    pub reload_timeout_ms: u64,
    pub invoke_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    pub memory_threshold_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub offline_cutoff_ms: i64,
    pub monitor_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkModeConfig {
    pub poll_interval_ms: u64,
    pub fallback_to_direct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub runtime_mode: RuntimeMode,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
    pub plugins: PluginsConfig,
    pub websocket: WebsocketConfig,
    pub heartbeat: HeartbeatConfig,
    pub network_mode: NetworkModeConfig,
    pub http: HttpConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            runtime_mode: RuntimeMode::Standalone,
            database: DatabaseConfig {
                mongo_uri: "mongodb://127.0.0.1:27017/meristem".to_string(),
                query_max_time_ms: 5_000,
            },
            nats: NatsConfig {
                url: "nats://127.0.0.1:4222".to_string(),
                token: None,
                stream: StreamConfig {
                    name: "MERISTEM_LOGS".to_string(),
                    replicas: 1,
                    max_bytes: 1_073_741_824,
                    max_age_ns: 7 * 24 * 3600 * 1_000_000_000_i64,
                    duplicate_window_secs: 120,
                    max_msg_size: 1_048_576,
                    account_max_storage: None,
                },
            },
            security: SecurityConfig {
                jwt_sign_secret: String::new(),
                jwt_verify_secrets: Vec::new(),
                jwt_rotation_grace_seconds: 300,
                plugin_secret: String::new(),
                bootstrap_token: String::new(),
            },
            audit: AuditConfig {
                hmac_secret: String::new(),
                hmac_key_id: "k1".to_string(),
                partition_count: 8,
                batch_size: 64,
                lease_duration_ms: 30_000,
                max_retry_attempts: 5,
                backlog_hard_limit: 10_000,
                anchor_interval_ms: 60_000,
                drain_interval_ms: 500,
            },
            plugins: PluginsConfig {
                base_path: "plugins".to_string(),
                runtime_cmd: "meristem-isolate-host".to_string(),
                stop_timeout_ms: 3_000,
                reload_timeout_ms: 5_000,
                invoke_timeout_ms: 10_000,
                ping_interval_ms: 5_000,
                pong_timeout_ms: 15_000,
                max_consecutive_failures: 2,
                memory_threshold_bytes: 512 * 1024 * 1024,
            },
            websocket: WebsocketConfig { path: "/ws".to_string() },
            heartbeat: HeartbeatConfig {
                offline_cutoff_ms: 90_000,
                monitor_interval_ms: 30_000,
            },
            network_mode: NetworkModeConfig {
                poll_interval_ms: 5_000,
                fallback_to_direct: true,
            },
            http: HttpConfig { bind: "127.0.0.1".to_string(), port: 8080 },
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load the core config: defaults → optional TOML file → `MERISTEM_*` env
/// overrides → validation.
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig, ConfigError> {
    let mut cfg = CoreConfig::default();

    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!("loaded config file {}", path.display());
        merge_raw(&mut cfg, raw)?;
    }

    apply_env(&mut cfg, |key| std::env::var(key).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

fn merge_raw(cfg: &mut CoreConfig, raw: RawConfig) -> Result<(), ConfigError> {
    if let Some(mode) = raw.runtime_mode {
        cfg.runtime_mode = parse_runtime_mode(&mode)?;
    }
    if let Some(db) = raw.database {
        if let Some(v) = db.mongo_uri {
            cfg.database.mongo_uri = v;
        }
        if let Some(v) = db.query_max_time_ms {
            cfg.database.query_max_time_ms = v;
        }
    }
    if let Some(nats) = raw.nats {
        if let Some(v) = nats.url {
            cfg.nats.url = v;
        }
        if let Some(v) = nats.token {
            cfg.nats.token = Some(v);
        }
        if let Some(stream) = nats.stream {
            if let Some(v) = stream.replicas {
                cfg.nats.stream.replicas = v;
            }
            if let Some(v) = stream.max_bytes {
                cfg.nats.stream.max_bytes = v;
            }
            if let Some(v) = stream.account_max_storage {
                cfg.nats.stream.account_max_storage = Some(v);
            }
        }
    }
    if let Some(sec) = raw.security {
        if let Some(v) = sec.jwt_sign_secret {
            cfg.security.jwt_sign_secret = v;
        }
        if let Some(v) = sec.jwt_verify_secrets {
            cfg.security.jwt_verify_secrets = v;
        }
        if let Some(v) = sec.jwt_rotation_grace_seconds {
            cfg.security.jwt_rotation_grace_seconds = v;
        }
        if let Some(v) = sec.plugin_secret {
            cfg.security.plugin_secret = v;
        }
        if let Some(v) = sec.bootstrap_token {
            cfg.security.bootstrap_token = v;
        }
    }
    if let Some(audit) = raw.audit {
        if let Some(v) = audit.hmac_secret {
            cfg.audit.hmac_secret = v;
        }
        if let Some(v) = audit.hmac_key_id {
            cfg.audit.hmac_key_id = v;
        }
        if let Some(v) = audit.partition_count {
            cfg.audit.partition_count = v;
        }
        if let Some(v) = audit.batch_size {
            cfg.audit.batch_size = v;
        }
        if let Some(v) = audit.lease_duration_ms {
            cfg.audit.lease_duration_ms = v;
        }
        if let Some(v) = audit.max_retry_attempts {
            cfg.audit.max_retry_attempts = v;
        }
        if let Some(v) = audit.backlog_hard_limit {
            cfg.audit.backlog_hard_limit = v;
        }
        if let Some(v) = audit.anchor_interval_ms {
            cfg.audit.anchor_interval_ms = v;
        }
        if let Some(v) = audit.drain_interval_ms {
            cfg.audit.drain_interval_ms = v;
        }
    }
    if let Some(plugins) = raw.plugins {
        if let Some(v) = plugins.base_path {
            cfg.plugins.base_path = v;
        }
        if let Some(v) = plugins.runtime_cmd {
            cfg.plugins.runtime_cmd = v;
        }
        if let Some(v) = plugins.stop_timeout_ms {
            cfg.plugins.stop_timeout_ms = v;
        }
        if let Some(v) = plugins.reload_timeout_ms {
            cfg.plugins.reload_timeout_ms = v;
        }
        if let Some(v) = plugins.invoke_timeout_ms {
            cfg.plugins.invoke_timeout_ms = v;
        }
        if let Some(v) = plugins.ping_interval_ms {
            cfg.plugins.ping_interval_ms = v;
        }
        if let Some(v) = plugins.pong_timeout_ms {
            cfg.plugins.pong_timeout_ms = v;
        }
        if let Some(v) = plugins.max_consecutive_failures {
            cfg.plugins.max_consecutive_failures = v;
        }
        if let Some(v) = plugins.memory_threshold_bytes {
            cfg.plugins.memory_threshold_bytes = v;
        }
    }
    if let Some(ws) = raw.websocket {
        if let Some(v) = ws.path {
            cfg.websocket.path = v;
        }
    }
    if let Some(hb) = raw.heartbeat {
        if let Some(v) = hb.offline_cutoff_ms {
            cfg.heartbeat.offline_cutoff_ms = v;
        }
        if let Some(v) = hb.monitor_interval_ms {
            cfg.heartbeat.monitor_interval_ms = v;
        }
    }
    if let Some(nm) = raw.network_mode {
        if let Some(v) = nm.poll_interval_ms {
            cfg.network_mode.poll_interval_ms = v;
        }
        if let Some(v) = nm.fallback_to_direct {
            cfg.network_mode.fallback_to_direct = v;
        }
    }
    if let Some(http) = raw.http {
        if let Some(v) = http.bind {
            cfg.http.bind = v;
        }
        if let Some(v) = http.port {
            cfg.http.port = v;
        }
    }
    Ok(())
}

/// Apply `MERISTEM_*` env overrides. `lookup` is injected so tests can run
/// without touching the process environment.
pub fn apply_env<F>(cfg: &mut CoreConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Legacy fallback first, so the canonical name wins when both are set.
    if let Some(v) = lookup("MONGO_URI") {
        cfg.database.mongo_uri = v;
    }
    if let Some(v) = lookup("MERISTEM_DATABASE_MONGO_URI") {
        cfg.database.mongo_uri = v;
    }
    if let Some(v) = lookup("MERISTEM_DATABASE_QUERY_MAX_TIME_MS") {
        cfg.database.query_max_time_ms = parse_num(&v, "MERISTEM_DATABASE_QUERY_MAX_TIME_MS")?;
    }
    if let Some(v) = lookup("MERISTEM_NATS_URL") {
        cfg.nats.url = v;
    }
    if let Some(v) = lookup("MERISTEM_NATS_TOKEN") {
        cfg.nats.token = Some(v);
    }
    if let Some(v) = lookup("NATS_STREAM_REPLICAS") {
        cfg.nats.stream.replicas = parse_num(&v, "NATS_STREAM_REPLICAS")?;
    }
    if let Some(v) = lookup("NATS_STREAM_MAX_BYTES") {
        cfg.nats.stream.max_bytes = parse_num(&v, "NATS_STREAM_MAX_BYTES")?;
    }
    if let Some(v) = lookup("MERISTEM_SECURITY_JWT_SIGN_SECRET") {
        cfg.security.jwt_sign_secret = v;
    }
    if let Some(v) = lookup("MERISTEM_SECURITY_JWT_VERIFY_SECRETS") {
        cfg.security.jwt_verify_secrets =
            v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Some(v) = lookup("MERISTEM_SECURITY_JWT_ROTATION_GRACE_SECONDS") {
        cfg.security.jwt_rotation_grace_seconds =
            parse_num(&v, "MERISTEM_SECURITY_JWT_ROTATION_GRACE_SECONDS")?;
    }
    if let Some(v) = lookup("MERISTEM_RUNTIME_MODE") {
        cfg.runtime_mode = parse_runtime_mode(&v)?;
    }
    if let Some(v) = lookup("MERISTEM_PLUGIN_BASE_PATH") {
        cfg.plugins.base_path = v;
    }
    if let Some(v) = lookup("MERISTEM_PLUGIN_SECRET") {
        cfg.security.plugin_secret = v;
    }
    if let Some(v) = lookup("MERISTEM_AUDIT_HMAC_SECRET") {
        cfg.audit.hmac_secret = v;
    }
    if let Some(v) = lookup("MERISTEM_AUDIT_HMAC_KEY_ID") {
        cfg.audit.hmac_key_id = v;
    }
    Ok(())
}

fn validate(cfg: &CoreConfig) -> Result<(), ConfigError> {
    if !cfg.security.jwt_sign_secret.is_empty()
        && !cfg.security.jwt_verify_secrets.contains(&cfg.security.jwt_sign_secret)
    {
        return Err(ConfigError::SignSecretNotVerifiable);
    }
    if cfg.audit.partition_count == 0 {
        return Err(ConfigError::InvalidValue {
            key: "audit.partition_count".to_string(),
            message: "must be >= 1".to_string(),
        });
    }
    if cfg.audit.batch_size == 0 {
        return Err(ConfigError::InvalidValue {
            key: "audit.batch_size".to_string(),
            message: "must be >= 1".to_string(),
        });
    }
    if cfg.plugins.stop_timeout_ms == 0 || cfg.plugins.reload_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: "plugins.stop_timeout_ms/reload_timeout_ms".to_string(),
            message: "timeouts must be > 0".to_string(),
        });
    }
    Ok(())
}

fn parse_runtime_mode(s: &str) -> Result<RuntimeMode, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "standalone" => Ok(RuntimeMode::Standalone),
        "connected" => Ok(RuntimeMode::Connected),
        other => Err(ConfigError::InvalidValue {
            key: "runtime_mode".to_string(),
            message: format!("unknown mode '{}'", other),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(v: &str, key: &str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}' is not a number", v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_validate() {
        let cfg = CoreConfig::default();
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.nats.stream.name, "MERISTEM_LOGS");
        assert_eq!(cfg.plugins.stop_timeout_ms, 3_000);
        assert_eq!(cfg.plugins.reload_timeout_ms, 5_000);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = CoreConfig::default();
        let env = env_map(&[
            ("MERISTEM_NATS_URL", "nats://example:4222"),
            ("MERISTEM_SECURITY_JWT_SIGN_SECRET", "s1"),
            ("MERISTEM_SECURITY_JWT_VERIFY_SECRETS", "s1, s0"),
            ("NATS_STREAM_REPLICAS", "3"),
        ]);
        apply_env(&mut cfg, |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.nats.url, "nats://example:4222");
        assert_eq!(cfg.security.jwt_sign_secret, "s1");
        assert_eq!(cfg.security.jwt_verify_secrets, vec!["s1", "s0"]);
        assert_eq!(cfg.nats.stream.replicas, 3);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn canonical_mongo_uri_wins_over_legacy() {
        let mut cfg = CoreConfig::default();
        let env = env_map(&[
            ("MONGO_URI", "mongodb://legacy/db"),
            ("MERISTEM_DATABASE_MONGO_URI", "mongodb://canonical/db"),
        ]);
        apply_env(&mut cfg, |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.database.mongo_uri, "mongodb://canonical/db");
    }

    #[test]
    fn legacy_mongo_uri_used_when_alone() {
        let mut cfg = CoreConfig::default();
        let env = env_map(&[("MONGO_URI", "mongodb://legacy/db")]);
        apply_env(&mut cfg, |k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.database.mongo_uri, "mongodb://legacy/db");
    }

    #[test]
    fn sign_secret_must_be_verifiable() {
        let mut cfg = CoreConfig::default();
        cfg.security.jwt_sign_secret = "s1".to_string();
        cfg.security.jwt_verify_secrets = vec!["other".to_string()];
        assert!(matches!(validate(&cfg), Err(ConfigError::SignSecretNotVerifiable)));
    }

    #[test]
    fn stream_clamp_applies_when_account_is_lower() {
        let mut stream = CoreConfig::default().nats.stream;
        stream.max_bytes = 1_000_000;
        stream.replicas = 2;
        stream.account_max_storage = Some(500_000);
        // 80% of 500_000 / 2 replicas
        assert_eq!(stream.effective_max_bytes(), 200_000);
    }

    #[test]
    fn stream_clamp_skipped_when_account_is_higher() {
        let mut stream = CoreConfig::default().nats.stream;
        stream.max_bytes = 1_000_000;
        stream.account_max_storage = Some(10_000_000);
        assert_eq!(stream.effective_max_bytes(), 1_000_000);
    }

    #[test]
    fn toml_file_merges() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "runtime_mode = \"connected\"\n[audit]\npartition_count = 4\n[http]\nport = 9090"
        )
        .unwrap();
        let cfg = load_config(Some(f.path())).unwrap();
        assert_eq!(cfg.runtime_mode, RuntimeMode::Connected);
        assert_eq!(cfg.audit.partition_count, 4);
        assert_eq!(cfg.http.port, 9090);
    }

    #[test]
    fn unknown_runtime_mode_rejected() {
        let mut cfg = CoreConfig::default();
        let env = env_map(&[("MERISTEM_RUNTIME_MODE", "turbo")]);
        let err = apply_env(&mut cfg, |k| env.get(k).cloned());
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));
    }
}
