//! Stampede Proxy - a stampede-safe caching proxy
//!
//! Serves slow origin data through a shared store. Concurrent misses for the
//! same key are coalesced behind a sharded lock so the origin is asked once,
//! origin outages are cached as negative entries, and a circuit breaker keeps
//! a failing origin from being hammered.

pub mod api;
pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod origin;
pub mod proxy;
pub mod random;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{Result, StreamingError};
pub use lock::{Locker, ShardedLocker};
pub use origin::{CircuitBreaker, DataProvider, GuardedProvider, HttpOrigin};
pub use proxy::{CachingProxy, TtlAdjuster, UNAVAILABLE_MARKER};
pub use random::{RandomDataProvider, RandomService};
pub use store::{MemoryStore, TempStore};
pub use tasks::spawn_cleanup_task;
