//! HTTP fetcher with rate limiting, bounded concurrency and retries
//!
//! Every fetch waits on a shared governor rate limiter (politeness
//! delay) and a semaphore bounding in-flight requests. Transient
//! failures (timeout, connection errors, 5xx, 429) are retried a
//! configured number of times with a linearly growing delay; anything
//! else fails immediately as permanent. The limiter and semaphore are
//! owned by the client instance, so independent crawls can run with
//! independent limits.

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infrastructure::config::CrawlerConfig;

/// Typed fetch failure. Transient means every retry attempt was
/// exhausted; permanent failures are never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure for {url} after {attempts} attempts: {last_cause}")]
    Transient { url: String, attempts: u32, last_cause: String },

    #[error("permanent failure for {url}: {reason}")]
    Permanent { url: String, status: Option<u16>, reason: String },

    #[error("fetch cancelled for {url}")]
    Cancelled { url: String },
}

impl FetchError {
    /// HTTP status of a permanent failure, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Permanent { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

/// 5xx and throttling responses are worth retrying; other client
/// errors are not.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Rate-limited HTTP client shared by all crawl workers.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    semaphore: Semaphore,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &CrawlerConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| anyhow::anyhow!("invalid user agent: {e}"))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        // One dispatch per politeness interval.
        let period = Duration::from_millis(config.politeness_delay_ms.max(1));
        let quota = Quota::with_period(period)
            .ok_or_else(|| anyhow::anyhow!("politeness delay must be non-zero"))?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            semaphore: Semaphore::new(config.max_concurrent_requests as usize),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Fetch a URL and return the response body as text.
    ///
    /// Holds a concurrency permit for the whole attempt sequence so
    /// retries of one URL do not release capacity to other workers.
    pub async fn fetch_text(
        &self,
        url: &str,
        cancellation: &CancellationToken,
    ) -> Result<String, FetchError> {
        if cancellation.is_cancelled() {
            return Err(FetchError::Cancelled { url: url.to_string() });
        }
        if url::Url::parse(url).is_err() {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: None,
                reason: "malformed URL".to_string(),
            });
        }

        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => {
                permit.map_err(|_| FetchError::Cancelled { url: url.to_string() })?
            }
            _ = cancellation.cancelled() => {
                return Err(FetchError::Cancelled { url: url.to_string() });
            }
        };

        let mut last_cause = String::new();
        for attempt in 1..=self.retry_attempts {
            if attempt > 1 {
                let backoff = self.retry_delay * (attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => {
                        return Err(FetchError::Cancelled { url: url.to_string() });
                    }
                }
            }

            tokio::select! {
                _ = self.rate_limiter.until_ready() => {}
                _ = cancellation.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            }

            debug!(url, attempt, "fetching");
            let result = tokio::select! {
                result = self.client.get(url).send() => result,
                _ = cancellation.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            };

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = tokio::select! {
                            text = response.text() => text,
                            _ = cancellation.cancelled() => {
                                return Err(FetchError::Cancelled { url: url.to_string() });
                            }
                        };
                        match text {
                            Ok(body) => {
                                debug!(url, len = body.len(), "fetched");
                                return Ok(body);
                            }
                            Err(e) => {
                                last_cause = format!("body read failed: {e}");
                            }
                        }
                    } else if is_transient_status(status) {
                        last_cause = format!("HTTP {status}");
                        warn!(url, %status, attempt, "transient HTTP error");
                    } else {
                        return Err(FetchError::Permanent {
                            url: url.to_string(),
                            status: Some(status.as_u16()),
                            reason: format!("HTTP {status}"),
                        });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_cause = e.to_string();
                    warn!(url, attempt, error = %e, "transient network error");
                }
                Err(e) if e.is_builder() => {
                    return Err(FetchError::Permanent {
                        url: url.to_string(),
                        status: None,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    // Resets and other mid-stream failures are retryable.
                    last_cause = e.to_string();
                    warn!(url, attempt, error = %e, "transient request error");
                }
            }
        }

        Err(FetchError::Transient {
            url: url.to_string(),
            attempts: self.retry_attempts,
            last_cause,
        })
    }
}
