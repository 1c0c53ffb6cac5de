//! Proxy Statistics Module
//!
//! Tracks how requests were served: from the store, by a fill, or not at all.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Proxy Stats ==
/// Lock-free counters shared by every caller of a proxy.
#[derive(Debug, Default)]
pub struct ProxyStats {
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fills: AtomicU64,
    negative_fills: AtomicU64,
    errors: AtomicU64,
}

impl ProxyStats {
    // == Constructor ==
    /// Creates a new ProxyStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Served real data from the store.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Served a cached unavailability marker.
    pub fn record_negative_hit(&self) {
        self.negative_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Fast path found nothing.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Waited on the lock and found another caller's fill.
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetched from the fallback and stored the data.
    pub fn record_fill(&self) {
        self.fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetched from the fallback and stored an unavailability marker.
    pub fn record_negative_fill(&self) {
        self.negative_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Request failed with a fatal error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            negative_fills: self.negative_fills.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProxyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub fills: u64,
    pub negative_fills: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Share of requests answered from the store, negative answers included.
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.negative_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
