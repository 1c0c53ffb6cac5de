//! Configuration Module
//!
//! Handles loading and managing proxy configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StreamingError};

const DEFAULT_ORIGIN_URLS: &[&str] = &[
    "https://www.rust-lang.org",
    "https://docs.rs",
    "https://crates.io",
    "https://tokio.rs",
];

/// Proxy configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Fixed key set the rotation service picks from
    pub origin_urls: Vec<String>,
    /// Lower bound of the TTL reported by the HTTP origin
    pub min_ttl: Duration,
    /// Upper bound of the TTL reported by the HTTP origin
    pub max_ttl: Duration,
    /// Replies written per `/stream` connection
    pub replies_per_stream: usize,
    /// Keep `/stream` open after the replies until the peer disconnects
    pub hold_connection: bool,
    /// Number of lock shards
    pub lock_shards: usize,
    /// Number of lock stripes in the in-memory store
    pub store_stripes: usize,
    /// Origin request timeout, doubles as the fallback round-trip estimate
    pub origin_timeout: Duration,
    /// Upper estimate of a shared store round trip
    pub storage_round_trip: Duration,
    /// Upper estimate of the proxy's own code execution
    pub code_execution_slack: Duration,
    /// TTL attached to "currently unavailable" answers
    pub unavailable_ttl: Duration,
    /// Consecutive failures tolerated before the breaker opens
    pub breaker_failure_threshold: u32,
    /// How long the breaker stays open before a trial call
    pub breaker_recovery: Duration,
    /// Optional bound on the shard-lock wait
    pub lock_wait_timeout: Option<Duration>,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `ORIGIN_URLS` - Comma-separated key set (default: a few public sites)
    /// - `MIN_TTL_MS` / `MAX_TTL_MS` - Origin TTL range (default: 10000 / 20000)
    /// - `REPLIES_PER_STREAM` - Replies per stream (default: 3)
    /// - `HOLD_CONNECTION` - Hold streams open (default: false)
    /// - `LOCK_SHARDS` - Lock shard count (default: 64)
    /// - `STORE_STRIPES` - Store stripe count (default: 16)
    /// - `ORIGIN_TIMEOUT_MS` - Origin request timeout (default: 5000)
    /// - `STORAGE_ROUND_TRIP_MS` - Store round-trip estimate (default: 2000)
    /// - `CODE_EXECUTION_SLACK_MS` - Code execution slack (default: 100)
    /// - `UNAVAILABLE_TTL_MS` - Negative answer TTL (default: 60000)
    /// - `BREAKER_FAILURE_THRESHOLD` - Tolerated failures (default: 0)
    /// - `BREAKER_RECOVERY_MS` - Breaker open window (default: 30000)
    /// - `LOCK_WAIT_TIMEOUT_MS` - Lock wait bound (default: unbounded)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            origin_urls: env::var("ORIGIN_URLS")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.origin_urls),
            min_ttl: env_millis("MIN_TTL_MS").unwrap_or(defaults.min_ttl),
            max_ttl: env_millis("MAX_TTL_MS").unwrap_or(defaults.max_ttl),
            replies_per_stream: env_or("REPLIES_PER_STREAM", defaults.replies_per_stream),
            hold_connection: env_or("HOLD_CONNECTION", defaults.hold_connection),
            lock_shards: env_or("LOCK_SHARDS", defaults.lock_shards),
            store_stripes: env_or("STORE_STRIPES", defaults.store_stripes),
            origin_timeout: env_millis("ORIGIN_TIMEOUT_MS").unwrap_or(defaults.origin_timeout),
            storage_round_trip: env_millis("STORAGE_ROUND_TRIP_MS")
                .unwrap_or(defaults.storage_round_trip),
            code_execution_slack: env_millis("CODE_EXECUTION_SLACK_MS")
                .unwrap_or(defaults.code_execution_slack),
            unavailable_ttl: env_millis("UNAVAILABLE_TTL_MS").unwrap_or(defaults.unavailable_ttl),
            breaker_failure_threshold: env_or(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_recovery: env_millis("BREAKER_RECOVERY_MS")
                .unwrap_or(defaults.breaker_recovery),
            lock_wait_timeout: env_millis("LOCK_WAIT_TIMEOUT_MS").or(defaults.lock_wait_timeout),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
        }
    }

    /// Rejects settings the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.origin_urls.is_empty() {
            return Err(StreamingError::Config("ORIGIN_URLS must not be empty".to_string()));
        }
        if self.lock_shards == 0 {
            return Err(StreamingError::Config("LOCK_SHARDS must be positive".to_string()));
        }
        if self.store_stripes == 0 {
            return Err(StreamingError::Config("STORE_STRIPES must be positive".to_string()));
        }
        if self.min_ttl > self.max_ttl {
            return Err(StreamingError::Config(format!(
                "MIN_TTL_MS ({}) exceeds MAX_TTL_MS ({})",
                self.min_ttl.as_millis(),
                self.max_ttl.as_millis()
            )));
        }
        if self.replies_per_stream == 0 {
            return Err(StreamingError::Config(
                "REPLIES_PER_STREAM must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            origin_urls: DEFAULT_ORIGIN_URLS.iter().map(|s| s.to_string()).collect(),
            min_ttl: Duration::from_secs(10),
            max_ttl: Duration::from_secs(20),
            replies_per_stream: 3,
            hold_connection: false,
            lock_shards: 64,
            store_stripes: 16,
            origin_timeout: Duration::from_secs(5),
            storage_round_trip: Duration::from_secs(2),
            code_execution_slack: Duration::from_millis(100),
            unavailable_ttl: Duration::from_secs(60),
            breaker_failure_threshold: 0,
            breaker_recovery: Duration::from_secs(30),
            lock_wait_timeout: None,
            cleanup_interval: 1,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
