use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use fleetgate_core::BackendNode;
use serde::{Deserialize, Serialize};

use crate::cache::CacheBucket;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    /// Backend fleet and upstream call policy
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Response cache buckets
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.rpc.timeout_ms == 0 {
            return Err("rpc.timeout_ms must be > 0".into());
        }
        if self.rpc.concurrency_limit == 0 {
            return Err("rpc.concurrency_limit must be > 0".into());
        }
        if self.alerts.broadcast_interval_ms == 0 {
            return Err("alerts.broadcast_interval_ms must be > 0".into());
        }
        if self.auth.enabled && self.auth.cleanup_interval_secs == 0 {
            return Err("auth.cleanup_interval_secs must be > 0".into());
        }
        if self.cache.max_entries == 0 {
            return Err("cache.max_entries must be > 0".into());
        }
        for (endpoint, bucket) in &self.cache.endpoints {
            if CacheBucket::from_label(bucket).is_none() {
                return Err(format!(
                    "cache.endpoints.{endpoint}: unknown bucket {bucket:?} (expected one of 10s, 15s, 30s, 15m)"
                ));
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Site label returned by `/auth/site`
    #[serde(default)]
    pub site: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            site: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// `false` runs the gateway without authentication.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lifetime the identity provider grants tokens, in seconds.
    #[serde(default = "default_identity_ttl_secs")]
    pub identity_ttl_secs: u64,
    #[serde(default = "default_token_cache_ttl_secs")]
    pub token_cache_ttl_secs: u64,
    /// Effective permission list of superadmins.
    #[serde(default)]
    pub super_admin_perms: Vec<String>,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Role name -> `resource:levels` permissions, for the built-in store.
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
    /// Route path -> permissions a caller needs (any of, plus the write flag).
    #[serde(default)]
    pub route_perms: HashMap<String, Vec<String>>,
}

/// User registered in the built-in identity store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Non-expiring tokens issued to this user.
    #[serde(default)]
    pub tokens: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_identity_ttl_secs() -> u64 {
    300
}
fn default_token_cache_ttl_secs() -> u64 {
    60
}
fn default_cleanup_interval_secs() -> u64 {
    15 * 60
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            identity_ttl_secs: default_identity_ttl_secs(),
            token_cache_ttl_secs: default_token_cache_ttl_secs(),
            super_admin_perms: Vec::new(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            roles: HashMap::new(),
            users: Vec::new(),
            route_perms: HashMap::new(),
        }
    }
}

impl AuthSettings {
    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_secs)
    }

    pub fn token_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default)]
    pub nodes: Vec<BackendNode>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Node key -> JSON-RPC URL used by the HTTP transport.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

fn default_rpc_timeout_ms() -> u64 {
    15_000
}
fn default_concurrency_limit() -> usize {
    2
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            timeout_ms: default_rpc_timeout_ms(),
            concurrency_limit: default_concurrency_limit(),
            endpoints: HashMap::new(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Endpoint id -> bucket label (`10s`, `15s`, `30s`, `15m`).
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

fn default_max_entries() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// How far back an incremental fetch looks, in milliseconds.
    #[serde(default = "default_recent_window_ms")]
    pub recent_window_ms: u64,
    #[serde(default = "default_alerts_limit")]
    pub limit: u64,
}

fn default_broadcast_interval_ms() -> u64 {
    5_000
}
fn default_recent_window_ms() -> u64 {
    5_000
}
fn default_alerts_limit() -> u64 {
    1_000
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval_ms(),
            recent_window_ms: default_recent_window_ms(),
            limit: default_alerts_limit(),
        }
    }
}

impl AlertsConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let path = PathBuf::from(path.unwrap_or("fleetgate.toml"));
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        // Environment variable overrides, e.g., FLEETGATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("FLEETGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
