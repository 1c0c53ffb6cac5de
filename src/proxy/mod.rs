//! Proxy Module
//!
//! Stampede-safe read-through caching in front of a slow data provider.
//!
//! A lookup reads the shared store first. On a miss it takes the key's shard
//! lock, reads the store again (another caller may have filled it while this
//! one waited), and only then calls the fallback provider and writes the
//! result back with an adjusted ttl. "Currently unavailable" answers are
//! cached the same way, as a marker value, so a known-down origin is not
//! asked again until the marker expires.

mod stats;
mod ttl;


pub use stats::{ProxyStats, StatsSnapshot};
pub use ttl::{TtlAdjuster, DEFAULT_CODE_EXECUTION_SLACK};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::error::{Result, StreamingError};
use crate::lock::Locker;
use crate::origin::DataProvider;
use crate::store::TempStore;

/// Value stored in place of data when the fallback reported it unavailable.
///
/// Compared by equality on read; real data equal to it reads as unavailable.
pub const UNAVAILABLE_MARKER: &str = "\u{1}data is currently unavailable";

enum Cached {
    Data(String, Duration),
    Unavailable(Duration),
}

impl Cached {
    fn into_result(self) -> Result<(String, Duration)> {
        match self {
            Cached::Data(data, ttl) => Ok((data, ttl)),
            Cached::Unavailable(ttl) => Err(StreamingError::CurrentlyUnavailable { ttl }),
        }
    }
}

// == Caching Proxy ==
/// Read-through cache over a [`TempStore`], serialized per key by a
/// [`Locker`], filled from a fallback [`DataProvider`].
///
/// At most one fallback call per lock shard is in flight at a time, and every
/// filled or negatively cached result is visible to all other callers through
/// the store. The proxy holds no mutable state of its own beyond statistics,
/// so it is safe for any number of concurrent callers.
pub struct CachingProxy<S, L, P> {
    store: Arc<S>,
    locker: Arc<L>,
    fallback: P,
    ttl: TtlAdjuster,
    lock_timeout: Option<Duration>,
    stats: Arc<ProxyStats>,
}

impl<S, L, P> CachingProxy<S, L, P>
where
    S: TempStore,
    L: Locker + 'static,
    P: DataProvider,
{
    // == Constructor ==
    pub fn new(store: Arc<S>, locker: Arc<L>, fallback: P, ttl: TtlAdjuster) -> Self {
        Self {
            store,
            locker,
            fallback,
            ttl,
            lock_timeout: None,
            stats: Arc::new(ProxyStats::new()),
        }
    }

    /// Bounds the wait for the shard lock; by default it is unbounded.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Request counters.
    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }

    async fn lookup(&self, key: &str) -> Result<(String, Duration)> {
        if let Some(cached) = self.try_store(key).await? {
            match cached {
                Cached::Data(..) => self.stats.record_hit(),
                Cached::Unavailable(_) => self.stats.record_negative_hit(),
            }
            return cached.into_result();
        }
        self.stats.record_miss();

        let guard = self.acquire(key).await?;
        let result = self.fill(key).await;
        guard.release().await;

        result
    }

    // Runs with the key's shard lock held.
    async fn fill(&self, key: &str) -> Result<(String, Duration)> {
        if let Some(cached) = self
            .try_store(key)
            .await
            .map_err(|e| e.context("recheck under lock"))?
        {
            self.stats.record_coalesced();
            return cached.into_result();
        }

        info!(key, "fetch data from fallback provider");

        match self.fallback.get(key).await {
            Ok((data, fallback_ttl)) => {
                let ttl = self.ttl.adjust(fallback_ttl);
                self.store
                    .set(key, &data, ttl)
                    .await
                    .map_err(|e| e.context("set data in storage"))?;
                self.stats.record_fill();

                Ok((data, ttl))
            }
            Err(StreamingError::CurrentlyUnavailable { ttl: fallback_ttl }) => {
                let ttl = self.ttl.adjust(fallback_ttl);
                self.store
                    .set(key, UNAVAILABLE_MARKER, ttl)
                    .await
                    .map_err(|e| e.context("set unavailable marker in storage"))?;
                self.stats.record_negative_fill();

                Err(StreamingError::CurrentlyUnavailable { ttl })
            }
            // Absence and open circuits belong to this proxy's own layers, an
            // upstream reporting either is just failing
            Err(e @ (StreamingError::NotFound(_) | StreamingError::CircuitOpen)) => Err(
                StreamingError::Origin(format!("get data from fallback provider: {e}")),
            ),
            Err(e) => Err(e.context("get data from fallback provider")),
        }
    }

    async fn try_store(&self, key: &str) -> Result<Option<Cached>> {
        match self.store.get(key).await {
            // A store may hand back an entry on its last instant; that is absent
            Ok((_, ttl)) if ttl.is_zero() => Ok(None),
            Ok((data, ttl)) if data == UNAVAILABLE_MARKER => Ok(Some(Cached::Unavailable(ttl))),
            Ok((data, ttl)) => Ok(Some(Cached::Data(data, ttl))),
            Err(StreamingError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.context("get data from storage")),
        }
    }

    async fn acquire(&self, key: &str) -> Result<LockGuard<L>> {
        let locking = self.locker.lock(key);
        let locked = match self.lock_timeout {
            None => locking.await,
            Some(limit) => tokio::time::timeout(limit, locking)
                .await
                .map_err(|_| StreamingError::LockTimeout(key.to_string()))?,
        };
        locked.map_err(|e| e.context("acquire lock"))?;

        Ok(LockGuard::new(self.locker.clone(), key))
    }
}

#[async_trait]
impl<S, L, P> DataProvider for CachingProxy<S, L, P>
where
    S: TempStore,
    L: Locker + 'static,
    P: DataProvider,
{
    async fn get(&self, key: &str) -> Result<(String, Duration)> {
        let result = self.lookup(key).await;
        if matches!(&result, Err(e) if !e.is_unavailable()) {
            self.stats.record_error();
        }
        result
    }
}

// == Lock Guard ==
// Releases the shard lock on every exit path. `release` is the normal path;
// if the fill future is dropped first (caller cancelled, or a panic) the
// unlock is handed to the runtime so the shard is not leaked.
struct LockGuard<L: Locker + 'static> {
    locker: Arc<L>,
    key: String,
    armed: bool,
}

impl<L: Locker + 'static> LockGuard<L> {
    fn new(locker: Arc<L>, key: &str) -> Self {
        Self {
            locker,
            key: key.to_string(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        unlock_logged(self.locker.as_ref(), &self.key).await;
    }
}

impl<L: Locker + 'static> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let locker = self.locker.clone();
        let key = std::mem::take(&mut self.key);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(key = %key, "fill abandoned, releasing lock in background");
                handle.spawn(async move {
                    unlock_logged(locker.as_ref(), &key).await;
                });
            }
            Err(_) => error!(key = %key, "fill abandoned outside a runtime, lock not released"),
        }
    }
}

// Release failures never reach the caller: the data is already computed.
async fn unlock_logged<L: Locker + ?Sized>(locker: &L, key: &str) {
    match locker.unlock(key).await {
        Ok(true) => {}
        Ok(false) => error!(key, "release lock, operation is unsuccessful"),
        Err(e) => error!(key, err = %e, "release lock"),
    }
}
