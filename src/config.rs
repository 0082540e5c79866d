//! Configuration management for the bridge.
//!
//! Configuration is deliberately small: the bridge exposes no tuning knobs
//! beyond the loopback port. Loading follows the usual layering: defaults,
//! an optional config file, then `WINDSURF_BRIDGE__*` environment variables.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Cascade session configuration.
    #[serde(default)]
    pub cascade: CascadeConfig,
    /// Credential resolution configuration.
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file, and the
    /// environment.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.port", i64::from(default_port()))?
            .set_default("server.timeout_secs", default_timeout() as i64)?
            .add_source(config::File::with_name("windsurf-bridge").required(false))
            .add_source(
                config::Environment::with_prefix("WINDSURF_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        // The one documented override: the loopback port.
        if let Ok(port) = std::env::var("WINDSURF_BRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                app_config.server.port = port;
            }
        }

        Ok(app_config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Loopback port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in seconds. Must comfortably exceed the cascade
    /// polling wall-clock bound.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    8787
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Cascade session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Sleep between trajectory polls, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum number of trajectory polls before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Per-RPC timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    1500
}

fn default_poll_attempts() -> u32 {
    60
}

fn default_rpc_timeout() -> u64 {
    30
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            poll_attempts: default_poll_attempts(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

/// Credential resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Cache window for resolved credentials, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    5
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}
