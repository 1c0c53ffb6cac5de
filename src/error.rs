//! Error types for the caching proxy
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Streaming Error Enum ==
/// Unified error type for the store, locker, origin and proxy layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamingError {
    /// Key absent from (or expired in) the shared store
    #[error("data was not found in storage: {0}")]
    NotFound(String),

    /// Origin is known to be down; the answer may be cached for `ttl`
    #[error("data is currently unavailable, retry in {}ms", .ttl.as_millis())]
    CurrentlyUnavailable { ttl: Duration },

    /// Origin calls are short-circuited by the breaker
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Shared store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Lock service failure
    #[error("lock error: {0}")]
    Lock(String),

    /// Shard lock was not acquired within the configured bound
    #[error("lock wait timed out for key: {0}")]
    LockTimeout(String),

    /// Origin failed in a way that must not be cached
    #[error("origin error: {0}")]
    Origin(String),

    /// Invalid request data
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unusable configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl StreamingError {
    /// Prefixes the failing operation to fatal errors.
    ///
    /// `NotFound`, `CurrentlyUnavailable` and `CircuitOpen` are returned
    /// untouched so callers can keep matching on them.
    pub fn context(self, op: &str) -> Self {
        match self {
            StreamingError::Storage(msg) => StreamingError::Storage(format!("{op}: {msg}")),
            StreamingError::Lock(msg) => StreamingError::Lock(format!("{op}: {msg}")),
            StreamingError::Origin(msg) => StreamingError::Origin(format!("{op}: {msg}")),
            StreamingError::InvalidRequest(msg) => {
                StreamingError::InvalidRequest(format!("{op}: {msg}"))
            }
            StreamingError::Config(msg) => StreamingError::Config(format!("{op}: {msg}")),
            other => other,
        }
    }

    /// Returns true for the cacheable "origin is down" answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StreamingError::CurrentlyUnavailable { .. })
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for StreamingError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = match &self {
            StreamingError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamingError::CurrentlyUnavailable { .. } | StreamingError::CircuitOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StreamingError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StreamingError::Origin(_) => StatusCode::BAD_GATEWAY,
            StreamingError::LockTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StreamingError::Storage(_) | StreamingError::Lock(_) | StreamingError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": message
        }));

        match self {
            StreamingError::CurrentlyUnavailable { ttl } => {
                // Retry-After is whole seconds, round up so clients never retry early
                let secs = ttl.as_millis().div_ceil(1000).to_string();
                (status, [(header::RETRY_AFTER, secs)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching proxy.
pub type Result<T> = std::result::Result<T, StreamingError>;
