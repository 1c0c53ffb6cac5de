//! Memory Store Module
//!
//! In-process [`TempStore`] backed by a striped concurrent map.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheEntry, TempStore};
use crate::error::{Result, StreamingError};
use crate::lock::shard_index;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 16;

// == Memory Store ==
/// Concurrent key to entry map guarded by striped locks.
///
/// Each key lives in the stripe `xxh3(key) mod stripes`, so callers touching
/// different stripes never contend.
#[derive(Debug)]
pub struct MemoryStore {
    stripes: Box<[RwLock<HashMap<String, CacheEntry>>]>,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty store with `stripes` lock stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self { stripes }
    }

    fn stripe(&self, key: &str) -> &RwLock<HashMap<String, CacheEntry>> {
        &self.stripes[shard_index(key, self.stripes.len())]
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for stripe in self.stripes.iter() {
            let mut entries = stripe.write().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired_at(now));
            removed += before - entries.len();
        }

        removed
    }

    // == Length ==
    /// Returns the number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for stripe in self.stripes.iter() {
            total += stripe.read().await.len();
        }
        total
    }

    // == Is Empty ==
    /// Returns true if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[async_trait]
impl TempStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<(String, Duration)> {
        let entries = self.stripe(key).read().await;

        entries
            .get(key)
            .and_then(|entry| {
                entry
                    .remaining_at(Instant::now())
                    .map(|ttl| (entry.value.clone(), ttl))
            })
            .ok_or_else(|| StreamingError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.stripe(key).write().await;

        // A zero ttl is never readable, so it only supersedes what was there
        if ttl.is_zero() {
            entries.remove(key);
            return Ok(());
        }

        entries.insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }
}
