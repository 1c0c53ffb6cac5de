//! Origin Module
//!
//! The data-provider capability shared by origins and caches, the circuit
//! breaker guarding origin calls, and an HTTP origin.

mod breaker;
mod http;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, GuardedProvider};
pub use http::HttpOrigin;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// == Data Provider ==
/// Provides data identified by key, together with the ttl after which it is
/// considered stale.
///
/// Providers layer on top of each other: a faster one can act as a cache for
/// a slower one. A [`StreamingError::CurrentlyUnavailable`] answer carries a
/// ttl too, meaning the provider will keep answering that way for that long,
/// so the answer itself may be cached.
///
/// [`StreamingError::CurrentlyUnavailable`]: crate::error::StreamingError::CurrentlyUnavailable
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Returns data for `key` and its ttl.
    async fn get(&self, key: &str) -> Result<(String, Duration)>;
}

#[async_trait]
impl<T: DataProvider + ?Sized> DataProvider for Arc<T> {
    async fn get(&self, key: &str) -> Result<(String, Duration)> {
        (**self).get(key).await
    }
}
