//! Store Module
//!
//! The shared temporary store the proxy caches into, plus an in-process
//! implementation of it.

mod entry;
mod memory;

pub use entry::CacheEntry;
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

// == Temp Store ==
/// Key-value storage whose entries expire after their ttl.
///
/// Implementations must be safe for unbounded concurrent callers and must
/// not retry internally; failures propagate to the caller.
#[async_trait]
pub trait TempStore: Send + Sync {
    /// Returns the value for `key` together with its remaining ttl.
    ///
    /// Fails with [`StreamingError::NotFound`](crate::error::StreamingError::NotFound)
    /// when the key is absent or its ttl has elapsed.
    async fn get(&self, key: &str) -> Result<(String, Duration)>;

    /// Creates or overwrites the entry for `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}
