//! Response DTOs for the proxy API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::origin::CircuitState;
use crate::proxy::StatsSnapshot;

/// Response body for GET /next
#[derive(Debug, Clone, Serialize)]
pub struct NextResponse {
    /// Data, or a sentinel when no data could be served
    pub reply: String,
}

impl NextResponse {
    /// Creates a new NextResponse
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct LookupResponse {
    /// The requested key
    pub key: String,
    /// The cached or freshly fetched value
    pub value: String,
    /// Remaining ttl in milliseconds
    pub ttl_ms: u64,
}

impl LookupResponse {
    /// Creates a new LookupResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl_ms,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Proxy counters
    #[serde(flatten)]
    pub proxy: StatsSnapshot,
    /// Share of requests answered from the store
    pub hit_rate: f64,
    /// Entries held by the in-memory store, expired ones until swept
    pub total_entries: usize,
    /// Origin circuit breaker state
    pub circuit: CircuitState,
}

impl StatsResponse {
    /// Creates a new StatsResponse from proxy statistics
    pub fn new(proxy: StatsSnapshot, total_entries: usize, circuit: CircuitState) -> Self {
        Self {
            hit_rate: proxy.hit_rate(),
            proxy,
            total_entries,
            circuit,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
