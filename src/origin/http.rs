//! HTTP Origin Module
//!
//! Fetches a key as a URL.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::error;

use super::DataProvider;
use crate::error::{Result, StreamingError};

// == HTTP Origin ==
/// The slow, unreliable source of truth: every key is a URL fetched over HTTP.
///
/// The origin publishes no freshness information, so each reply is given a
/// ttl drawn uniformly from `[min_ttl, max_ttl]`. Transport failures,
/// timeouts and 5xx replies mean the site is down and are answered with
/// `CurrentlyUnavailable(unavailable_ttl)`; other non-success replies are
/// fatal.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
    min_ttl: Duration,
    max_ttl: Duration,
    unavailable_ttl: Duration,
}

impl HttpOrigin {
    /// Creates an origin whose requests give up after `request_timeout`.
    pub fn new(
        request_timeout: Duration,
        min_ttl: Duration,
        max_ttl: Duration,
        unavailable_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StreamingError::Config(format!("build http client: {e}")))?;

        Ok(Self::with_client(client, min_ttl, max_ttl, unavailable_ttl))
    }

    /// Creates an origin around an existing client.
    pub fn with_client(
        client: reqwest::Client,
        min_ttl: Duration,
        max_ttl: Duration,
        unavailable_ttl: Duration,
    ) -> Self {
        Self {
            client,
            min_ttl,
            max_ttl: max_ttl.max(min_ttl),
            unavailable_ttl,
        }
    }

    fn random_ttl(&self) -> Duration {
        let min = self.min_ttl.as_millis() as u64;
        let max = self.max_ttl.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn unavailable(&self) -> StreamingError {
        StreamingError::CurrentlyUnavailable {
            ttl: self.unavailable_ttl,
        }
    }
}

#[async_trait]
impl DataProvider for HttpOrigin {
    async fn get(&self, key: &str) -> Result<(String, Duration)> {
        let response = match self.client.get(key).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(StreamingError::Origin(format!("invalid url {key}: {e}")));
            }
            Err(e) => {
                error!(url = key, err = %e, "get data from url");
                return Err(self.unavailable());
            }
        };

        let status = response.status();
        if status.is_server_error() {
            error!(url = key, %status, "origin replied with server error");
            return Err(self.unavailable());
        }
        if !status.is_success() {
            return Err(StreamingError::Origin(format!(
                "unexpected status {status} from {key}"
            )));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(url = key, err = %e, "read body from url");
                return Err(self.unavailable());
            }
        };

        Ok((body, self.random_ttl()))
    }
}
