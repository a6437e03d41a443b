use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;
use shardwatch_db::StoreOptions;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 262144 = 256KB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Directory holding one file per player
    /// Env: DATA_DIR (default: "data/players")
    pub data_dir: String,

    /// Player records kept in memory
    /// Env: CACHE_CAPACITY (default: 200)
    pub cache_capacity: usize,

    /// How often dirty records are written out
    /// Env: FLUSH_INTERVAL_SECS (default: 15)
    pub flush_interval: Duration,

    /// Gap that still counts as one continuous session
    /// Env: INACTIVITY_THRESHOLD_SECS (default: 180)
    pub inactivity_threshold: Duration,

    /// How long session and ping history is kept
    /// Env: RETENTION_DAYS (default: 31)
    pub retention: Duration,

    /// Bearer token for /api/admin/* (admin routes refuse every request when unset)
    /// Env: ADMIN_TOKEN
    pub admin_token: Option<String>,

    /// Bearer token the shard poller presents on /api/ingest (refused when unset)
    /// Env: INGEST_TOKEN
    pub ingest_token: Option<String>,

    /// Rate limit for /api/ingest (requests per second)
    /// Env: RATE_LIMIT_INGEST_PER_SEC (default: 20)
    /// Six shards every 5 seconds plus retries
    pub rate_limit_ingest_per_sec: u64,

    /// Burst size for /api/ingest
    /// Env: RATE_LIMIT_INGEST_BURST (default: 40)
    pub rate_limit_ingest_burst: u32,

    /// Rate limit for timeline, snapshot and roster queries (requests per second)
    /// Env: RATE_LIMIT_QUERY_PER_SEC (default: 10)
    pub rate_limit_query_per_sec: u64,

    /// Burst size for query endpoints
    /// Env: RATE_LIMIT_QUERY_BURST (default: 20)
    pub rate_limit_query_burst: u32,

    /// Rate limit for admin endpoints (requests per second)
    /// Env: RATE_LIMIT_ADMIN_PER_SEC (default: 2)
    pub rate_limit_admin_per_sec: u64,

    /// Burst size for admin endpoints
    /// Env: RATE_LIMIT_ADMIN_BURST (default: 5)
    pub rate_limit_admin_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", defaults.port),
            data_dir: env_or_default_string("DATA_DIR", &defaults.data_dir),
            cache_capacity: env_or_default("CACHE_CAPACITY", defaults.cache_capacity),
            flush_interval: Duration::from_secs(env_or_default("FLUSH_INTERVAL_SECS", 15)),
            inactivity_threshold: Duration::from_secs(env_or_default("INACTIVITY_THRESHOLD_SECS", 180)),
            retention: Duration::from_secs(env_or_default("RETENTION_DAYS", 31u64) * 24 * 60 * 60),
            admin_token: env_optional("ADMIN_TOKEN"),
            ingest_token: env_optional("INGEST_TOKEN"),
            rate_limit_ingest_per_sec: env_or_default("RATE_LIMIT_INGEST_PER_SEC", defaults.rate_limit_ingest_per_sec),
            rate_limit_ingest_burst: env_or_default("RATE_LIMIT_INGEST_BURST", defaults.rate_limit_ingest_burst),
            rate_limit_query_per_sec: env_or_default("RATE_LIMIT_QUERY_PER_SEC", defaults.rate_limit_query_per_sec),
            rate_limit_query_burst: env_or_default("RATE_LIMIT_QUERY_BURST", defaults.rate_limit_query_burst),
            rate_limit_admin_per_sec: env_or_default("RATE_LIMIT_ADMIN_PER_SEC", defaults.rate_limit_admin_per_sec),
            rate_limit_admin_burst: env_or_default("RATE_LIMIT_ADMIN_BURST", defaults.rate_limit_admin_burst),
        }
    }

    /// Store tuning derived from this configuration
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            capacity: self.cache_capacity,
            inactivity_threshold: self.inactivity_threshold,
            retention: self.retention,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_body_limit: 256 * 1024, // 256 KB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            data_dir: "data/players".to_string(),
            cache_capacity: shardwatch_db::DEFAULT_CACHE_CAPACITY,
            flush_interval: Duration::from_secs(15),
            inactivity_threshold: shardwatch_db::DEFAULT_INACTIVITY_THRESHOLD,
            retention: shardwatch_db::DEFAULT_RETENTION,
            admin_token: None,
            ingest_token: None,
            rate_limit_ingest_per_sec: 20,
            rate_limit_ingest_burst: 40,
            rate_limit_query_per_sec: 10,
            rate_limit_query_burst: 20,
            rate_limit_admin_per_sec: 2,
            rate_limit_admin_burst: 5,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

/// Non-empty environment variable, if set
fn env_optional(key: &str) -> Option<String> {
    var(key).ok().filter(|val| !val.trim().is_empty())
}
