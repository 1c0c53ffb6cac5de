//! Logging wrapper for random data providers.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::RandomDataProvider;
use crate::error::Result;

/// Logs every `get_next` call with its outcome and elapsed time.
pub struct TimedRandomProvider<R> {
    inner: R,
}

impl<R: RandomDataProvider> TimedRandomProvider<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: RandomDataProvider> RandomDataProvider for TimedRandomProvider<R> {
    async fn get_next(&self) -> Result<String> {
        let begin = Instant::now();
        let result = self.inner.get_next().await;

        info!(
            method = "get_next",
            ok = result.is_ok(),
            took_ms = begin.elapsed().as_millis() as u64,
            "served random data"
        );

        result
    }
}
