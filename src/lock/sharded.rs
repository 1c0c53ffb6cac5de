//! Sharded Locker Module
//!
//! In-process [`Locker`] with a fixed set of shard locks.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{shard_index, Locker};
use crate::error::{Result, StreamingError};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

// A single-permit semaphore rather than a Mutex: lock and unlock are separate
// calls, so there is no guard to carry between them. `holder` names the key
// that took the permit; only that key may give it back.
#[derive(Debug)]
struct Shard {
    permit: Semaphore,
    holder: Mutex<Option<String>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            holder: Mutex::new(None),
        }
    }

    fn holder(&self) -> MutexGuard<'_, Option<String>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Sharded Locker ==
/// Partitions the key space onto `N` locks allocated at construction.
#[derive(Debug)]
pub struct ShardedLocker {
    shards: Box<[Shard]>,
}

impl ShardedLocker {
    // == Constructor ==
    /// Creates a locker with `shards` locks (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Shard::new()).collect();
        Self { shards }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard `key` is routed to.
    pub fn shard_of(&self, key: &str) -> usize {
        shard_index(key, self.shards.len())
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_of(key)]
    }
}

impl Default for ShardedLocker {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

#[async_trait]
impl Locker for ShardedLocker {
    async fn lock(&self, key: &str) -> Result<()> {
        let shard = self.shard(key);

        shard
            .permit
            .acquire()
            .await
            .map_err(|e| StreamingError::Lock(format!("acquire shard lock: {e}")))?
            .forget();
        *shard.holder() = Some(key.to_string());

        Ok(())
    }

    async fn unlock(&self, key: &str) -> Result<bool> {
        let shard = self.shard(key);

        let mut holder = shard.holder();

        // Not held, or held by another key routed to the same shard
        if holder.as_deref() != Some(key) {
            return Ok(false);
        }
        *holder = None;
        shard.permit.add_permits(1);

        Ok(true)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_then_unlock() {
        let locker = ShardedLocker::new(4);

        locker.lock("k").await.unwrap();
        assert!(locker.unlock("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_without_lock_reports_failure() {
        let locker = ShardedLocker::new(4);

        assert!(!locker.unlock("k").await.unwrap());
        // A stray release must not create a second permit
        locker.lock("k").await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), locker.lock("k")).await;
        assert!(second.is_err(), "shard should still be held");
    }

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locker = Arc::new(ShardedLocker::new(4));
        locker.lock("k").await.unwrap();

        let waiter = {
            let locker = locker.clone();
            tokio::spawn(async move { locker.lock("k").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second lock must wait for release");

        assert!(locker.unlock("k").await.unwrap());
        waiter.await.unwrap().unwrap();
        assert!(locker.unlock("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_wakes_waiter() {
        let locker = ShardedLocker::new(4);
        locker.lock("k").await.unwrap();

        let mut waiter = tokio_test::task::spawn(locker.lock("k"));
        tokio_test::assert_pending!(waiter.poll());

        assert!(locker.unlock("k").await.unwrap());
        assert!(waiter.is_woken());
        tokio_test::assert_ready_ok!(waiter.poll());
    }

    #[tokio::test]
    async fn test_keys_on_same_shard_contend() {
        // With one shard every key shares the lock
        let locker = ShardedLocker::new(1);
        locker.lock("a").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), locker.lock("b")).await;
        assert!(blocked.is_err());

        locker.unlock("a").await.unwrap();
        locker.lock("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_by_other_key_on_same_shard_is_refused() {
        let locker = ShardedLocker::new(1);
        locker.lock("a").await.unwrap();

        assert!(!locker.unlock("b").await.unwrap());
        let blocked = tokio::time::timeout(Duration::from_millis(20), locker.lock("b")).await;
        assert!(blocked.is_err(), "shard must stay with its holder");

        assert!(locker.unlock("a").await.unwrap());
        locker.lock("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_double_unlock_reports_failure() {
        let locker = ShardedLocker::new(4);
        locker.lock("k").await.unwrap();

        assert!(locker.unlock("k").await.unwrap());
        assert!(!locker.unlock("k").await.unwrap());
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let locker = ShardedLocker::new(16);
        let shard = locker.shard_of("https://docs.rs");

        assert!(shard < locker.shard_count());
        assert_eq!(locker.shard_of("https://docs.rs"), shard);
    }
}
