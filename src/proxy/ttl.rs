//! TTL Adjustment Module
//!
//! Converts the ttl an origin reports into a duration that is safe to cache
//! for.

use std::time::Duration;

/// Default code-execution slack.
pub const DEFAULT_CODE_EXECUTION_SLACK: Duration = Duration::from_millis(100);

// == TTL Adjuster ==
/// Discounts an origin ttl by static upper bounds on the time already spent
/// before the value lands in the shared store.
///
/// The origin computes its ttl when it serves the response. By the time the
/// proxy writes the value, up to one origin round trip, one store round trip
/// and the proxy's own execution time have passed. The estimates are never
/// measured live; caching too briefly is preferred over serving data past the
/// origin's own staleness bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlAdjuster {
    /// Upper bound on an origin round trip
    pub fallback_round_trip: Duration,
    /// Upper bound on a store round trip
    pub storage_round_trip: Duration,
    /// Upper bound on the proxy's own execution time
    pub code_execution_slack: Duration,
}

impl TtlAdjuster {
    // == Constructor ==
    pub fn new(
        fallback_round_trip: Duration,
        storage_round_trip: Duration,
        code_execution_slack: Duration,
    ) -> Self {
        Self {
            fallback_round_trip,
            storage_round_trip,
            code_execution_slack,
        }
    }

    /// An adjuster that caches for exactly the origin ttl.
    pub fn identity() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    // == Adjust ==
    /// `max(origin_ttl - fallback - storage - slack, 0)`.
    ///
    /// Zero means nothing useful can be cached.
    pub fn adjust(&self, origin_ttl: Duration) -> Duration {
        origin_ttl
            .saturating_sub(self.fallback_round_trip)
            .saturating_sub(self.storage_round_trip)
            .saturating_sub(self.code_execution_slack)
    }
}
