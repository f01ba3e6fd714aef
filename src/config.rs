//! Configuration module for netpulse.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "netpulse.db")
    pub db_path: String,
    /// Maximum number of entries accepted per upload batch (default: 100)
    pub max_batch_size: usize,
    /// Default `/api/logs` limit when the query parameter is omitted
    /// (default: 1000)
    pub default_query_limit: i64,
    /// Hard upper bound for `/api/logs` limit (default: 10000)
    pub max_query_limit: i64,
    /// TTL for the query result cache (default: 60s)
    pub cache_ttl: Duration,
    /// Bound on any single storage operation (default: 5s)
    pub storage_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "netpulse.db".to_string(),
            max_batch_size: 100,
            default_query_limit: 1000,
            max_query_limit: 10000,
            cache_ttl: Duration::from_secs(60),
            storage_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETPULSE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `NETPULSE_DB_PATH`: Database file path (default: "netpulse.db")
    /// - `NETPULSE_MAX_BATCH_SIZE`: max entries per upload (default: 100)
    /// - `NETPULSE_DEFAULT_QUERY_LIMIT`: default `/api/logs` limit (default: 1000)
    /// - `NETPULSE_MAX_QUERY_LIMIT`: hard `/api/logs` limit (default: 10000)
    /// - `NETPULSE_CACHE_TTL_SECS`: query cache TTL (default: 60)
    /// - `NETPULSE_STORAGE_TIMEOUT_SECS`: storage operation bound (default: 5)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("NETPULSE_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("NETPULSE_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(max) = env_parse("NETPULSE_MAX_BATCH_SIZE") {
            cfg.max_batch_size = max;
        }
        if let Some(limit) = env_parse("NETPULSE_DEFAULT_QUERY_LIMIT") {
            cfg.default_query_limit = limit;
        }
        if let Some(limit) = env_parse("NETPULSE_MAX_QUERY_LIMIT") {
            cfg.max_query_limit = limit;
        }
        if let Some(secs) = env_parse("NETPULSE_CACHE_TTL_SECS") {
            cfg.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("NETPULSE_STORAGE_TIMEOUT_SECS") {
            cfg.storage_timeout = Duration::from_secs(secs);
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
