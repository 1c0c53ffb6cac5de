//! Circuit Breaker Module
//!
//! Stops calling a failing origin for a recovery window, then lets a single
//! trial call through to probe whether it is back.
//!
//! ```text
//! Closed   -> Open     consecutive failures exceed the threshold
//! Open     -> HalfOpen recovery window elapsed, next call becomes the trial
//! HalfOpen -> Closed   trial succeeded
//! HalfOpen -> Open     trial failed (window restarts)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::DataProvider;
use crate::error::{Result, StreamingError};

// == Circuit State ==
/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through, failures are counted
    Closed,
    /// Calls fail fast until the recovery window elapses
    Open,
    /// One trial call is in flight
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

// == Config ==
/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures tolerated; the breaker opens once the count
    /// exceeds this, so `0` trips on the first failure.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    // Bumped on every state change; outcomes of calls admitted under an
    // older generation are discarded.
    generation: u64,
}

impl Inner {
    fn set_state(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}

// == Circuit Breaker ==
/// Thread-safe breaker; all transitions are serialized by an internal mutex
/// that is never held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    // == Constructor ==
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                generation: 0,
            }),
        }
    }

    /// Current state.
    ///
    /// An open breaker whose window has elapsed still reports `Open` until
    /// the next call arrives and becomes the trial.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Consecutive failures counted while closed.
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    // == Call ==
    /// Runs `f` if the breaker admits it and records the outcome.
    ///
    /// Fails with [`StreamingError::CircuitOpen`] without invoking `f` while
    /// the breaker is open or a trial call is already in flight.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.admit()?;
        let result = f().await;
        permit.complete(result.is_ok());
        result
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, inner.generation, false)),
            CircuitState::HalfOpen => Err(StreamingError::CircuitOpen),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
                if !elapsed {
                    return Err(StreamingError::CircuitOpen);
                }

                inner.set_state(CircuitState::HalfOpen);
                info!(breaker = %self.name, "circuit half-open, admitting trial call");
                Ok(Permit::new(self, inner.generation, true))
            }
        }
    }

    fn on_success(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            debug!(breaker = %self.name, "ignoring success from an earlier generation");
            return;
        }

        match inner.state {
            CircuitState::HalfOpen => {
                inner.set_state(CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                info!(breaker = %self.name, "circuit closed, origin recovered");
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            // No call is admitted while open
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            debug!(breaker = %self.name, "ignoring failure from an earlier generation");
            return;
        }

        match inner.state {
            CircuitState::HalfOpen => {
                self.trip(&mut inner);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures > self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.set_state(CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        warn!(
            breaker = %self.name,
            failures = inner.consecutive_failures,
            recovery_ms = self.config.recovery_timeout.as_millis() as u64,
            "circuit opened"
        );
    }
}

// Outcome recorder for one admitted call, tied to the generation it was
// admitted in. A trial dropped before completing (its caller was cancelled)
// counts as failed, otherwise the breaker would stay half-open forever.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    done: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            done: false,
        }
    }

    fn complete(mut self, ok: bool) {
        self.done = true;
        if ok {
            self.breaker.on_success(self.generation);
        } else {
            self.breaker.on_failure(self.generation);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.done && self.trial {
            debug!(breaker = %self.breaker.name, "trial call abandoned");
            self.breaker.on_failure(self.generation);
        }
    }
}

// == Guarded Provider ==
/// Runs every fetch of the inner provider through a [`CircuitBreaker`].
///
/// Any error from the inner provider counts as a failure. While the breaker
/// is open the provider answers `CurrentlyUnavailable(unavailable_ttl)`
/// immediately.
pub struct GuardedProvider<P> {
    inner: P,
    breaker: Arc<CircuitBreaker>,
    unavailable_ttl: Duration,
}

impl<P> GuardedProvider<P> {
    /// Wraps `inner` with `breaker`.
    pub fn new(inner: P, breaker: Arc<CircuitBreaker>, unavailable_ttl: Duration) -> Self {
        Self {
            inner,
            breaker,
            unavailable_ttl,
        }
    }

    /// The breaker guarding this provider.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<P: DataProvider> DataProvider for GuardedProvider<P> {
    async fn get(&self, key: &str) -> Result<(String, Duration)> {
        match self.breaker.call(|| self.inner.get(key)).await {
            Err(StreamingError::CircuitOpen) => {
                debug!(key, "origin call short-circuited");
                Err(StreamingError::CurrentlyUnavailable {
                    ttl: self.unavailable_ttl,
                })
            }
            other => other,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RECOVERY: Duration = Duration::from_secs(10);
    const UNAVAILABLE_TTL: Duration = Duration::from_secs(60);

    /// Replays scripted answers and counts calls.
    struct Scripted {
        answers: Mutex<VecDeque<Result<(String, Duration)>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(answers: Vec<Result<(String, Duration)>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataProvider for Scripted {
        async fn get(&self, _key: &str) -> Result<(String, Duration)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(("fresh".to_string(), Duration::from_secs(5))))
        }
    }

    fn ok(value: &str) -> Result<(String, Duration)> {
        Ok((value.to_string(), Duration::from_secs(5)))
    }

    fn fatal() -> Result<(String, Duration)> {
        Err(StreamingError::Origin("boom".to_string()))
    }

    fn guarded(
        answers: Vec<Result<(String, Duration)>>,
    ) -> GuardedProvider<Arc<Scripted>> {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 0,
                recovery_timeout: RECOVERY,
            },
        ));
        GuardedProvider::new(Arc::new(Scripted::new(answers)), breaker, UNAVAILABLE_TTL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_trips_breaker() {
        let provider = guarded(vec![fatal()]);
        let origin = provider.inner.clone();

        assert!(matches!(provider.get("k").await, Err(StreamingError::Origin(_))));
        assert_eq!(provider.breaker().state(), CircuitState::Open);

        // Fails fast without touching the origin
        let second = provider.get("k").await;
        assert_eq!(
            second,
            Err(StreamingError::CurrentlyUnavailable { ttl: UNAVAILABLE_TTL })
        );
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes_breaker() {
        let provider = guarded(vec![fatal(), ok("back")]);
        let origin = provider.inner.clone();

        let _ = provider.get("k").await;
        tokio::time::advance(RECOVERY).await;

        assert_eq!(provider.get("k").await.unwrap().0, "back");
        assert_eq!(provider.breaker().state(), CircuitState::Closed);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_restarts_window() {
        let provider = guarded(vec![fatal(), fatal()]);
        let origin = provider.inner.clone();

        let _ = provider.get("k").await;
        tokio::time::advance(RECOVERY).await;
        let _ = provider.get("k").await;
        assert_eq!(provider.breaker().state(), CircuitState::Open);

        // Window restarted at the trial failure
        tokio::time::advance(RECOVERY - Duration::from_millis(1)).await;
        assert!(provider.get("k").await.unwrap_err().is_unavailable());
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_answer_counts_as_failure() {
        let provider = guarded(vec![Err(StreamingError::CurrentlyUnavailable {
            ttl: Duration::from_secs(30),
        })]);

        let first = provider.get("k").await;
        assert_eq!(
            first,
            Err(StreamingError::CurrentlyUnavailable {
                ttl: Duration::from_secs(30)
            })
        );
        assert_eq!(provider.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_tolerates_failures() {
        let breaker = CircuitBreaker::new(
            "tolerant",
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: RECOVERY,
            },
        );

        for _ in 0..2 {
            let _ = breaker.call(|| async { fatal() }).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        let _ = breaker.call(|| async { fatal() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(
            "tolerant",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: RECOVERY,
            },
        );

        let _ = breaker.call(|| async { fatal() }).await;
        assert_eq!(breaker.consecutive_failures(), 1);
        let _ = breaker.call(|| async { ok("v") }).await;
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_in_half_open() {
        let breaker = Arc::new(CircuitBreaker::new("single", CircuitBreakerConfig::default()));
        let _ = breaker.call(|| async { fatal() }).await;
        tokio::time::advance(CircuitBreakerConfig::default().recovery_timeout).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = wait.await;
                        ok("v")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = breaker.call(|| async { ok("other") }).await;
        assert_eq!(concurrent, Err(StreamingError::CircuitOpen));

        release.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_reopens() {
        let breaker = CircuitBreaker::new("abandoned", CircuitBreakerConfig::default());
        let _ = breaker.call(|| async { fatal() }).await;
        tokio::time::advance(CircuitBreakerConfig::default().recovery_timeout).await;

        let pending = breaker.call(|| std::future::pending::<Result<(String, Duration)>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcome_from_before_trip_is_ignored() {
        let breaker = Arc::new(CircuitBreaker::new("late", CircuitBreakerConfig::default()));
        let recovery = CircuitBreakerConfig::default().recovery_timeout;

        // Admitted while closed, finishes only after the breaker has moved on
        let (finish_slow, slow_wait) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = slow_wait.await;
                        ok("slow")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let _ = breaker.call(|| async { fatal() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(recovery).await;

        let (finish_trial, trial_wait) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        let _ = trial_wait.await;
                        fatal()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        finish_slow.send(()).unwrap();
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let extra = breaker.call(|| async { ok("extra") }).await;
        assert_eq!(extra, Err(StreamingError::CircuitOpen));

        // The trial alone decides the next state
        finish_trial.send(()).unwrap();
        assert!(trial.await.unwrap().is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
