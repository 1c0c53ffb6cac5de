//! Cache Entry Module
//!
//! Defines the structure for individual store entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// A single immutable store entry.
///
/// A refill never mutates an entry; it replaces it with a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The stored value
    pub value: String,
    /// When the entry was written
    pub created_at: Instant,
    /// How long the entry lives
    pub ttl: Duration,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry written now.
    pub fn new(value: String, ttl: Duration) -> Self {
        Self::created_at(value, ttl, Instant::now())
    }

    /// Creates an entry written at `created_at`.
    pub fn created_at(value: String, ttl: Duration, created_at: Instant) -> Self {
        Self {
            value,
            created_at,
            ttl,
        }
    }

    /// Instant at which the entry stops being readable.
    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: the entry is expired once `now >= created_at + ttl`,
    /// so a zero-ttl entry is never readable.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    // == Time To Live ==
    /// Returns the remaining ttl at `now`, or `None` once expired.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        let expires = self.expires_at();
        if now >= expires {
            None
        } else {
            Some(expires - now)
        }
    }
}
