//! Lock Module
//!
//! Key-routed mutual exclusion used to serialize cache fills.
//!
//! # Shard count tuning
//! Keys are spread over a fixed number of shards. Unrelated keys that hash to
//! the same shard serialize against each other; that costs latency, never
//! correctness. Raise the shard count when fills for distinct hot keys queue
//! behind each other, keep it small when each shard is an expensive resource
//! (for example a lock held in a networked service).

mod sharded;

pub use sharded::ShardedLocker;

use async_trait::async_trait;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;

// == Locker ==
/// Manages locks identified by key.
///
/// Equal keys always operate on the same lock. Distinct keys may or may not
/// share one, at the implementation's discretion.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Blocks until the lock associated with `key` is acquired.
    async fn lock(&self, key: &str) -> Result<()>;

    /// Releases the lock associated with `key`.
    ///
    /// `Ok(false)` means the release did not take effect, e.g. the lock had
    /// already expired or was not held.
    async fn unlock(&self, key: &str) -> Result<bool>;
}

// == Shard Index ==
/// Maps `key` onto one of `shards` buckets.
///
/// Uses xxh3-64 over the key bytes, which is identical across processes and
/// builds, so lock services shared between processes agree on assignment.
/// `shards` must be positive.
pub fn shard_index(key: &str, shards: usize) -> usize {
    (xxh3_64(key.as_bytes()) % shards as u64) as usize
}
