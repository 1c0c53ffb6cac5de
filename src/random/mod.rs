//! Random Module
//!
//! Serves data for a key picked at random from a fixed key set.

mod logging;

pub use logging::TimedRandomProvider;

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::error::{Result, StreamingError};
use crate::origin::DataProvider;

// == Random Data Provider ==
/// Provides a chunk of data for some key of the provider's choosing.
#[async_trait]
pub trait RandomDataProvider: Send + Sync {
    /// Returns the next chunk of random data.
    async fn get_next(&self) -> Result<String>;
}

#[async_trait]
impl<T: RandomDataProvider + ?Sized> RandomDataProvider for Arc<T> {
    async fn get_next(&self) -> Result<String> {
        (**self).get_next().await
    }
}

// == Random Service ==
/// Picks a key uniformly at random and delegates to a [`DataProvider`].
pub struct RandomService<P> {
    keys: Vec<String>,
    provider: P,
}

impl<P: DataProvider> RandomService<P> {
    /// Creates the service; the key set must not be empty.
    pub fn new(keys: Vec<String>, provider: P) -> Result<Self> {
        if keys.is_empty() {
            return Err(StreamingError::Config(
                "random service needs at least one key".to_string(),
            ));
        }
        Ok(Self { keys, provider })
    }

    /// The fixed key set.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn pick(&self) -> &str {
        // `new` guarantees a non-empty key set
        self.keys
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[async_trait]
impl<P: DataProvider> RandomDataProvider for RandomService<P> {
    async fn get_next(&self) -> Result<String> {
        let key = self.pick();

        let (data, _) = self
            .provider
            .get(key)
            .await
            .map_err(|e| e.context("get key"))?;

        Ok(data)
    }
}
