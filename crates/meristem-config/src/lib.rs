mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{load_config, AuditConfig, CoreConfig, DatabaseConfig, HeartbeatConfig,
    HttpConfig, NatsConfig, NetworkModeConfig, PluginsConfig, RuntimeMode, SecurityConfig,
    StreamConfig, WebsocketConfig};
