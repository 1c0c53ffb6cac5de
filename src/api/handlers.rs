//! API Handlers
//!
//! HTTP request handlers for each proxy endpoint.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Result, StreamingError};
use crate::lock::{Locker, ShardedLocker};
use crate::models::{HealthResponse, LookupResponse, NextResponse, StatsResponse};
use crate::origin::{
    CircuitBreaker, CircuitBreakerConfig, DataProvider, GuardedProvider, HttpOrigin,
};
use crate::proxy::{CachingProxy, ProxyStats, TtlAdjuster};
use crate::random::{RandomDataProvider, RandomService, TimedRandomProvider};
use crate::store::MemoryStore;

/// Reply sent in place of data the origin cannot currently serve.
pub const UNAVAILABLE_REPLY: &str = "unavailable";

/// Reply sent in place of data when the request failed for any other reason.
pub const ERROR_REPLY: &str = "err";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Rotation service behind `/stream` and `/next`
    pub random: Arc<dyn RandomDataProvider>,
    /// Caching proxy behind `/get/:key`
    pub proxy: Arc<dyn DataProvider>,
    /// Proxy counters
    pub stats: Arc<ProxyStats>,
    /// In-memory store the proxy fills
    pub store: Arc<MemoryStore>,
    /// Breaker guarding the origin
    pub breaker: Arc<CircuitBreaker>,
    /// Replies written per stream
    pub replies_per_stream: usize,
    /// Keep streams open after the replies until the peer leaves
    pub hold_connection: bool,
}

impl AppState {
    /// Creates a new AppState around an assembled proxy.
    ///
    /// The rotation service picks from `keys` and goes through `proxy`.
    pub fn new<L, P>(
        store: Arc<MemoryStore>,
        breaker: Arc<CircuitBreaker>,
        proxy: CachingProxy<MemoryStore, L, P>,
        keys: Vec<String>,
    ) -> Result<Self>
    where
        L: Locker + 'static,
        P: DataProvider + 'static,
    {
        let stats = proxy.stats().clone();
        let proxy: Arc<dyn DataProvider> = Arc::new(proxy);
        let random = TimedRandomProvider::new(RandomService::new(keys, proxy.clone())?);

        Ok(Self {
            random: Arc::new(random),
            proxy,
            stats,
            store,
            breaker,
            replies_per_stream: 3,
            hold_connection: false,
        })
    }

    /// Sets the per-stream reply count and hold behavior.
    pub fn with_stream(mut self, replies_per_stream: usize, hold_connection: bool) -> Self {
        self.replies_per_stream = replies_per_stream;
        self.hold_connection = hold_connection;
        self
    }

    /// Creates a new AppState from configuration.
    ///
    /// Wires memory store, sharded locker, HTTP origin behind a circuit
    /// breaker, caching proxy and rotation service.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::new(config.store_stripes));
        let locker = Arc::new(ShardedLocker::new(config.lock_shards));

        let origin = HttpOrigin::new(
            config.origin_timeout,
            config.min_ttl,
            config.max_ttl,
            config.unavailable_ttl,
        )?;
        let breaker = Arc::new(CircuitBreaker::new(
            "origin",
            CircuitBreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                recovery_timeout: config.breaker_recovery,
            },
        ));
        let guarded = GuardedProvider::new(origin, breaker.clone(), config.unavailable_ttl);

        // The origin timeout bounds how stale the origin's ttl can be on arrival
        let ttl = TtlAdjuster::new(
            config.origin_timeout,
            config.storage_round_trip,
            config.code_execution_slack,
        );
        let mut proxy = CachingProxy::new(store.clone(), locker, guarded, ttl);
        if let Some(limit) = config.lock_wait_timeout {
            proxy = proxy.with_lock_timeout(limit);
        }

        Ok(Self::new(store, breaker, proxy, config.origin_urls.clone())?
            .with_stream(config.replies_per_stream, config.hold_connection))
    }
}

/// Maps a rotation result onto what is sent to the peer.
pub fn reply_for(result: Result<String>) -> String {
    match result {
        Ok(data) => data,
        Err(e) if e.is_unavailable() => UNAVAILABLE_REPLY.to_string(),
        Err(e) => {
            error!(err = %e, "get next random data");
            ERROR_REPLY.to_string()
        }
    }
}

/// Handler for GET /stream
///
/// Streams `replies_per_stream` replies as newline-delimited JSON. The
/// replies are produced by a task bound to this connection: it stops as soon
/// as the peer goes away and is the only owner of the sender, so the body
/// ends exactly once.
pub async fn stream_handler(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel(state.replies_per_stream.max(1));
    tokio::spawn(stream_replies(state, tx));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn stream_replies(state: AppState, tx: mpsc::Sender<std::result::Result<String, Infallible>>) {
    info!(replies = state.replies_per_stream, "received a stream request");

    for _ in 0..state.replies_per_stream {
        let result = tokio::select! {
            result = state.random.get_next() => result,
            _ = tx.closed() => {
                debug!("stream peer went away mid-request");
                return;
            }
        };

        let line = match serde_json::to_string(&NextResponse::new(reply_for(result))) {
            Ok(line) => line + "\n",
            Err(e) => {
                error!(err = %e, "encode stream reply");
                return;
            }
        };
        if tx.send(Ok(line)).await.is_err() {
            debug!("stream peer went away");
            return;
        }
    }

    if state.hold_connection {
        tx.closed().await;
        debug!("held stream closed by peer");
    }
}

/// Handler for GET /next
///
/// Returns one rotation reply.
pub async fn next_handler(State(state): State<AppState>) -> Json<NextResponse> {
    let reply = reply_for(state.random.get_next().await);
    Json(NextResponse::new(reply))
}

/// Handler for GET /get/:key
///
/// Looks `key` up through the caching proxy. The key is percent-decoded, so
/// URLs must be percent-encoded into a single path segment.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LookupResponse>> {
    if key.is_empty() {
        return Err(StreamingError::InvalidRequest("Key cannot be empty".to_string()));
    }

    let (value, ttl) = state.proxy.get(&key).await?;

    Ok(Json(LookupResponse::new(key, value, ttl.as_millis() as u64)))
}

/// Handler for GET /stats
///
/// Returns proxy statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.stats.snapshot(),
        state.store.len().await,
        state.breaker.state(),
    ))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
