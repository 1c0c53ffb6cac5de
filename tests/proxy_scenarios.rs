//! Proxy Scenario Tests
//!
//! Drives the caching proxy end to end over the in-memory store and sharded
//! locker, with the tokio clock paused so ttls are exact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stampede_proxy::{
    origin::CircuitBreakerConfig, CachingProxy, CircuitBreaker, DataProvider, GuardedProvider,
    MemoryStore, Result, ShardedLocker, StreamingError, TempStore, TtlAdjuster,
    UNAVAILABLE_MARKER,
};

// == Helpers ==

/// Origin replaying scripted answers, then a default page, after a delay.
struct ScriptedOrigin {
    calls: AtomicUsize,
    delay: Duration,
    answers: Mutex<VecDeque<Result<(String, Duration)>>>,
}

impl ScriptedOrigin {
    fn new(delay: Duration, answers: Vec<Result<(String, Duration)>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            answers: Mutex::new(answers.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for ScriptedOrigin {
    async fn get(&self, _key: &str) -> Result<(String, Duration)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(("v1".to_string(), Duration::from_secs(10))))
    }
}

fn adjuster() -> TtlAdjuster {
    TtlAdjuster::new(
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::from_millis(100),
    )
}

fn proxy_over<P: DataProvider>(
    store: Arc<MemoryStore>,
    origin: P,
) -> CachingProxy<MemoryStore, ShardedLocker, P> {
    CachingProxy::new(store, Arc::new(ShardedLocker::default()), origin, adjuster())
}

// == Scenarios ==

#[tokio::test(start_paused = true)]
async fn cold_key_is_filled_with_adjusted_ttl() {
    let store = Arc::new(MemoryStore::default());
    let origin = ScriptedOrigin::new(Duration::ZERO, Vec::new());
    let proxy = proxy_over(store.clone(), origin.clone());

    let (value, ttl) = proxy.get("k1").await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(ttl, Duration::from_millis(7_900));

    let (stored, stored_ttl) = store.get("k1").await.unwrap();
    assert_eq!(stored, "v1");
    assert_eq!(stored_ttl, Duration::from_millis(7_900));
    assert_eq!(origin.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn warm_key_is_served_without_origin_call() {
    let store = Arc::new(MemoryStore::default());
    store.set("k1", "v1", Duration::from_secs(5)).await.unwrap();
    let origin = ScriptedOrigin::new(Duration::ZERO, Vec::new());
    let proxy = proxy_over(store, origin.clone());

    let (value, ttl) = proxy.get("k1").await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(ttl, Duration::from_secs(5));
    assert_eq!(origin.calls(), 0);
    assert_eq!(proxy.stats().snapshot().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_cold_calls_reach_origin_once() {
    let store = Arc::new(MemoryStore::default());
    let origin = ScriptedOrigin::new(Duration::from_millis(100), Vec::new());
    let proxy = Arc::new(proxy_over(store, origin.clone()));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.get("k2").await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(origin.calls(), 1);
    assert!(results.iter().all(|r| r == &results[0]));
    assert_eq!(results[0].0, "v1");

    let stats = proxy.stats().snapshot();
    assert_eq!(stats.fills, 1);
    assert_eq!(stats.misses + stats.hits, 50);
    assert_eq!(stats.coalesced, stats.misses - 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_answer_is_cached_as_marker() {
    let store = Arc::new(MemoryStore::default());
    let origin = ScriptedOrigin::new(
        Duration::ZERO,
        vec![Err(StreamingError::CurrentlyUnavailable {
            ttl: Duration::from_secs(30),
        })],
    );
    let proxy = proxy_over(store.clone(), origin.clone());
    let adjusted = Duration::from_millis(27_900);

    let first = proxy.get("k3").await;
    assert_eq!(
        first,
        Err(StreamingError::CurrentlyUnavailable { ttl: adjusted })
    );

    let (stored, stored_ttl) = store.get("k3").await.unwrap();
    assert_eq!(stored, UNAVAILABLE_MARKER);
    assert_eq!(stored_ttl, adjusted);

    tokio::time::advance(Duration::from_secs(10)).await;
    let second = proxy.get("k3").await;
    assert_eq!(
        second,
        Err(StreamingError::CurrentlyUnavailable {
            ttl: adjusted - Duration::from_secs(10)
        })
    );
    assert_eq!(origin.calls(), 1);

    // Once the marker expires the origin is asked again
    tokio::time::advance(Duration::from_secs(20)).await;
    let (value, _) = proxy.get("k3").await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_fails_fast_then_admits_trial() {
    let recovery = Duration::from_secs(30);
    let store = Arc::new(MemoryStore::default());
    let origin = ScriptedOrigin::new(
        Duration::ZERO,
        vec![Err(StreamingError::Origin("connection reset".to_string()))],
    );
    let breaker = Arc::new(CircuitBreaker::new(
        "origin",
        CircuitBreakerConfig {
            failure_threshold: 0,
            recovery_timeout: recovery,
        },
    ));
    let guarded = GuardedProvider::new(origin.clone(), breaker.clone(), recovery);
    let proxy = proxy_over(store, guarded);

    let first = proxy.get("k4").await;
    assert!(matches!(first, Err(StreamingError::Origin(_))));
    assert_eq!(origin.calls(), 1);

    let second = proxy.get("k4").await;
    assert!(matches!(
        second,
        Err(StreamingError::CurrentlyUnavailable { .. })
    ));
    assert_eq!(origin.calls(), 1);

    tokio::time::advance(recovery).await;

    let (value, _) = proxy.get("k4").await.unwrap();
    assert_eq!(value, "v1");
    assert_eq!(origin.calls(), 2);
    assert_eq!(breaker.state(), stampede_proxy::origin::CircuitState::Closed);
}
