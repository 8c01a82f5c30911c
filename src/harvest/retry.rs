//! Retry and backoff around the page fetcher
//!
//! Rate limiting is retried without bound on the same request since the
//! cursor must eventually be fetched. Transient network failures are retried
//! with capped exponential backoff up to a fixed number of attempts. Every
//! other classified failure is returned to the caller immediately.

use crate::adapter::{ParseError, RequestDescriptor};
use crate::config::RetryConfig;
use crate::harvest::fetcher::{FetchOutcome, PageFetcher};
use crate::HarvestError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shortest pause after a rate-limited response, even when the hint says zero
const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Backoff parameters for one harvest
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Failed network attempts tolerated for one request
    pub max_network_attempts: u32,
    pub network_base_delay: Duration,
    pub network_max_delay: Duration,
    /// Wait used when the server gives no hint
    pub rate_limit_fallback: Duration,
    /// Upper bound for any rate-limit wait, hinted or not
    pub rate_limit_max_wait: Duration,
    /// Double the fallback for every consecutive rate-limit hit
    pub escalate_rate_limit_wait: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_network_attempts: config.max_network_attempts,
            network_base_delay: Duration::from_secs(config.network_base_delay_secs),
            network_max_delay: Duration::from_secs(config.network_max_delay_secs),
            rate_limit_fallback: Duration::from_secs(config.rate_limit_fallback_secs),
            rate_limit_max_wait: Duration::from_secs(config.rate_limit_max_wait_secs),
            escalate_rate_limit_wait: config.escalate_rate_limit_wait,
        }
    }

    /// Delay before retrying after the `attempt`-th network failure (1-based)
    pub fn network_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.network_base_delay
            .saturating_mul(factor)
            .min(self.network_max_delay)
    }

    /// Wait after a rate-limited response
    ///
    /// # Arguments
    ///
    /// * `hint` - Server-provided wait, if any
    /// * `consecutive` - Rate-limit hits in a row for this request, including this one
    pub fn rate_limit_wait(&self, hint: Option<Duration>, consecutive: u32) -> Duration {
        match hint {
            Some(hint) => hint.max(MIN_RATE_LIMIT_WAIT).min(self.rate_limit_max_wait),
            None if self.escalate_rate_limit_wait => {
                let factor = 2u32.saturating_pow(consecutive.saturating_sub(1));
                self.rate_limit_fallback
                    .saturating_mul(factor)
                    .min(self.rate_limit_max_wait)
            }
            None => self.rate_limit_fallback.min(self.rate_limit_max_wait),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Waiting mechanism, injected so tests can run on a virtual clock
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Sleeper that returns immediately and remembers every requested wait
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wait requested so far, in order
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Sum of all requested waits
    pub fn total(&self) -> Duration {
        self.waits().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Value produced by a controlled fetch plus what it took to get it
#[derive(Debug, Clone, PartialEq)]
pub struct Controlled<T> {
    pub value: T,
    pub rate_limit_hits: u32,
    pub network_retries: u32,
}

/// Wraps the page fetcher with the backoff policy
pub struct RateLimitController {
    fetcher: PageFetcher,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimitController {
    pub fn new(fetcher: PageFetcher, policy: BackoffPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            fetcher,
            policy,
            sleeper,
        }
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Fetches until success or a non-retryable failure
    ///
    /// # Returns
    ///
    /// * `Ok(Controlled)` - The parsed value plus rate-limit hits and network retries absorbed
    /// * `Err(HarvestError::AuthFailure)` - Credentials were rejected
    /// * `Err(HarvestError::RetriesExhausted)` - Network failures exceeded the attempt cap
    /// * `Err(HarvestError::MalformedResponse)` - The body could not be parsed
    /// * `Err(HarvestError::Rejected)` - Unexpected HTTP status
    /// * `Err(HarvestError::Transport)` - The request could not be built
    /// * `Err(HarvestError::Storage)` - The response could not be archived
    pub async fn execute<T, F>(
        &self,
        request: &RequestDescriptor,
        archive_prefix: &str,
        parse: F,
    ) -> Result<Controlled<T>, HarvestError>
    where
        F: Fn(&str) -> Result<T, ParseError>,
    {
        let mut rate_limit_hits = 0u32;
        let mut rate_limit_streak = 0u32;
        let mut network_failures = 0u32;

        loop {
            let outcome = self.fetcher.fetch(request, archive_prefix, &parse).await?;
            tracing::debug!("{} -> {}", request.url, outcome.name());

            match outcome {
                FetchOutcome::Success(value) => {
                    return Ok(Controlled {
                        value,
                        rate_limit_hits,
                        network_retries: network_failures,
                    });
                }
                FetchOutcome::RateLimited { retry_after } => {
                    rate_limit_hits += 1;
                    rate_limit_streak += 1;
                    let wait = self.policy.rate_limit_wait(retry_after, rate_limit_streak);
                    tracing::warn!(
                        "Rate limited! ({} hits) Waiting for {} seconds before retrying...",
                        rate_limit_hits,
                        wait.as_secs()
                    );
                    self.sleeper.sleep(wait).await;
                }
                FetchOutcome::TransientNetworkError(error) => {
                    rate_limit_streak = 0;
                    network_failures += 1;
                    if network_failures >= self.policy.max_network_attempts {
                        return Err(HarvestError::RetriesExhausted {
                            attempts: network_failures,
                            last_error: error,
                        });
                    }
                    let delay = self.policy.network_delay(network_failures);
                    tracing::warn!(
                        "Network error (attempt {}/{}): {}. Retrying in {} seconds",
                        network_failures,
                        self.policy.max_network_attempts,
                        error,
                        delay.as_secs()
                    );
                    self.sleeper.sleep(delay).await;
                }
                FetchOutcome::AuthFailure { status, message } => {
                    tracing::error!(
                        "Authentication failed (HTTP {}). Update the auth and CSRF tokens.",
                        status
                    );
                    return Err(HarvestError::AuthFailure { status, message });
                }
                FetchOutcome::MalformedResponse { archived, message } => {
                    return Err(HarvestError::MalformedResponse { archived, message });
                }
                FetchOutcome::Rejected { status, archived } => {
                    return Err(HarvestError::Rejected { status, archived });
                }
            }
        }
    }
}
