use serde::{Deserialize, Serialize};

/// Raw TOML representation of the core config file. Every field is
/// optional; defaults and env overrides are applied by the loader.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub runtime_mode: Option<String>,
    pub database: Option<RawDatabase>,
    pub nats: Option<RawNats>,
    pub security: Option<RawSecurity>,
    pub audit: Option<RawAudit>,
    pub plugins: Option<RawPlugins>,
    pub websocket: Option<RawWebsocket>,
    pub heartbeat: Option<RawHeartbeat>,
    pub network_mode: Option<RawNetworkMode>,
    pub http: Option<RawHttp>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawDatabase {
    pub mongo_uri: Option<String>,
    pub query_max_time_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawNats {
    pub url: Option<String>,
    pub token: Option<String>,
    pub stream: Option<RawStream>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawStream {
    pub replicas: Option<u32>,
    pub max_bytes: Option<i64>,
    /// Account-level storage limit, when known. Used for the 80% clamp.
    pub account_max_storage: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawSecurity {
    pub jwt_sign_secret: Option<String>,
    /// Comma-separated in env form; a list in TOML form.
    pub jwt_verify_secrets: Option<Vec<String>>,
    pub jwt_rotation_grace_seconds: Option<u64>,
    pub plugin_secret: Option<String>,
    pub bootstrap_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawAudit {
    pub hmac_secret: Option<String>,
    pub hmac_key_id: Option<String>,
    pub partition_count: Option<u32>,
    pub batch_size: Option<u32>,
    pub lease_duration_ms: Option<u64>,
    pub max_retry_attempts: Option<u32>,
    pub backlog_hard_limit: Option<u64>,
    pub anchor_interval_ms: Option<u64>,
    pub drain_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawPlugins {
    pub base_path: Option<String>,
    pub runtime_cmd: Option<String>,
    pub stop_timeout_ms: Option<u64>,
    pub reload_timeout_ms: Option<u64>,
    pub invoke_timeout_ms: Option<u64>,
    pub ping_interval_ms: Option<u64>,
    pub pong_timeout_ms: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub memory_threshold_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawWebsocket {
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawHeartbeat {
    pub offline_cutoff_ms: Option<i64>,
    pub monitor_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawNetworkMode {
    pub poll_interval_ms: Option<u64>,
    pub fallback_to_direct: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawHttp {
    pub bind: Option<String>,
    pub port: Option<u16>,
}
