//! Single-call page fetcher
//!
//! Issues exactly one request through the transport, archives whatever body
//! came back, and classifies the result. Retrying is not done here.
//!
//! # Classification
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | Timeout / connection failure | TransientNetworkError |
//! | HTTP 429 | RateLimited (wait hint from headers) |
//! | HTTP 401 / 403 | AuthFailure |
//! | HTTP 5xx | TransientNetworkError |
//! | Other non-2xx | Rejected |
//! | 2xx, parse ok | Success |
//! | 2xx, body reports rate limiting | RateLimited |
//! | 2xx, body reports bad session | AuthFailure |
//! | 2xx, unparseable | MalformedResponse |

use crate::adapter::{ParseError, RequestDescriptor};
use crate::harvest::transport::{RawResponse, Transport};
use crate::storage::ResponseArchive;
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Classified result of one HTTP call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),

    /// The server asked us to slow down; `retry_after` is its hint, if any
    RateLimited { retry_after: Option<Duration> },

    AuthFailure { status: u16, message: String },

    TransientNetworkError(String),

    MalformedResponse { archived: PathBuf, message: String },

    /// Unexpected non-2xx status that retrying will not fix
    Rejected { status: u16, archived: PathBuf },
}

impl<T> FetchOutcome<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RateLimited { .. } => "rate-limited",
            Self::AuthFailure { .. } => "auth-failure",
            Self::TransientNetworkError(_) => "transient-network-error",
            Self::MalformedResponse { .. } => "malformed-response",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Issues requests and archives every response body
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    archive: ResponseArchive,
}

impl PageFetcher {
    pub fn new(transport: Arc<dyn Transport>, archive: ResponseArchive) -> Self {
        Self { transport, archive }
    }

    /// Performs one call and classifies it
    ///
    /// # Arguments
    ///
    /// * `request` - The request built by the adapter
    /// * `archive_prefix` - File name prefix for the archived body
    /// * `parse` - Parser applied to 2xx bodies
    ///
    /// # Returns
    ///
    /// * `Ok(FetchOutcome)` - The classified outcome, body already archived
    /// * `Err(HarvestError::Transport)` - The request itself could not be built
    /// * `Err(HarvestError::Storage)` - The body could not be archived
    pub async fn fetch<T, F>(
        &self,
        request: &RequestDescriptor,
        archive_prefix: &str,
        parse: F,
    ) -> Result<FetchOutcome<T>, HarvestError>
    where
        F: Fn(&str) -> Result<T, ParseError>,
    {
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) if !e.is_retryable() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Request to {} failed: {}", request.url, e);
                return Ok(FetchOutcome::TransientNetworkError(e.to_string()));
            }
        };

        let archived = self.archive.archive(archive_prefix, &response.body)?;

        Ok(classify(response, archived, parse))
    }
}

fn classify<T, F>(response: RawResponse, archived: PathBuf, parse: F) -> FetchOutcome<T>
where
    F: Fn(&str) -> Result<T, ParseError>,
{
    let status = response.status;

    match status {
        429 => FetchOutcome::RateLimited {
            retry_after: parse_wait_hint(&response, Utc::now()),
        },
        401 | 403 => FetchOutcome::AuthFailure {
            status,
            message: snippet(&response.body),
        },
        500..=599 => FetchOutcome::TransientNetworkError(format!(
            "HTTP {}: {}",
            status,
            snippet(&response.body)
        )),
        200..=299 => match parse(&response.body) {
            Ok(value) => FetchOutcome::Success(value),
            Err(ParseError::RateLimited { retry_after, message }) => {
                tracing::debug!("Rate limit reported in body: {}", message);
                FetchOutcome::RateLimited {
                    retry_after: retry_after.or_else(|| parse_wait_hint(&response, Utc::now())),
                }
            }
            Err(ParseError::Unauthorized(message)) => FetchOutcome::AuthFailure { status, message },
            Err(ParseError::Malformed(message)) => {
                FetchOutcome::MalformedResponse { archived, message }
            }
        },
        _ => {
            tracing::error!("Error: {} - {}", status, snippet(&response.body));
            FetchOutcome::Rejected { status, archived }
        }
    }
}

/// Reads the server's wait hint from a rate-limited response
///
/// `retry-after` may be delta seconds or an HTTP date; `x-rate-limit-reset`
/// is an epoch timestamp. Hints in the past yield a zero wait.
pub fn parse_wait_hint(response: &RawResponse, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = response.header("retry-after") {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            return Some(until(date.with_timezone(&Utc), now));
        }
    }

    let reset = response.header("x-rate-limit-reset")?.trim().parse::<i64>().ok()?;
    let reset = DateTime::from_timestamp(reset, 0)?;
    Some(until(reset, now))
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::transport::TransportError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FixedTransport(Mutex<Option<Result<RawResponse, TransportError>>>);

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, _request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
            self.0.lock().unwrap().take().unwrap()
        }
    }

    fn fetcher(
        dir: &TempDir,
        response: Result<RawResponse, TransportError>,
    ) -> PageFetcher {
        PageFetcher::new(
            Arc::new(FixedTransport(Mutex::new(Some(response)))),
            ResponseArchive::new(dir.path()).unwrap(),
        )
    }

    fn parse_len(body: &str) -> Result<usize, ParseError> {
        match body {
            "rate" => Err(ParseError::RateLimited {
                retry_after: None,
                message: "Rate limit exceeded".to_string(),
            }),
            "auth" => Err(ParseError::Unauthorized("bad token".to_string())),
            "junk" => Err(ParseError::Malformed("invalid JSON".to_string())),
            _ => Ok(body.len()),
        }
    }

    async fn outcome(response: Result<RawResponse, TransportError>) -> (FetchOutcome<usize>, TempDir) {
        let dir = TempDir::new().unwrap();
        let request = RequestDescriptor::get("https://x.com/api");
        let outcome = fetcher(&dir, response)
            .fetch(&request, "test_response", parse_len)
            .await
            .unwrap();
        (outcome, dir)
    }

    fn archived_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_success_is_archived() {
        let (outcome, dir) = outcome(Ok(RawResponse::new(200, "hello"))).await;
        assert_eq!(outcome, FetchOutcome::Success(5));
        assert_eq!(archived_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_429_with_retry_after() {
        let response = RawResponse::new(429, "slow down").with_header("retry-after", "5");
        let (outcome, dir) = outcome(Ok(response)).await;
        assert_eq!(
            outcome,
            FetchOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(archived_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_auth_statuses() {
        for status in [401, 403] {
            let (outcome, _dir) = outcome(Ok(RawResponse::new(status, "nope"))).await;
            assert!(matches!(outcome, FetchOutcome::AuthFailure { status: s, .. } if s == status));
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let (outcome, dir) = outcome(Ok(RawResponse::new(503, "unavailable"))).await;
        assert!(matches!(outcome, FetchOutcome::TransientNetworkError(msg) if msg.contains("503")));
        assert_eq!(archived_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient_and_not_archived() {
        let (outcome, dir) = outcome(Err(TransportError::Timeout("30s".to_string()))).await;
        assert!(matches!(outcome, FetchOutcome::TransientNetworkError(_)));
        assert_eq!(archived_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_fatal() {
        let dir = TempDir::new().unwrap();
        let request = RequestDescriptor::get("https://x.com/api");
        let error = fetcher(
            &dir,
            Err(TransportError::InvalidRequest("header referer".to_string())),
        )
        .fetch(&request, "test_response", parse_len)
        .await
        .unwrap_err();
        assert!(matches!(error, HarvestError::Transport(TransportError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_other_status_is_rejected() {
        let (outcome, _dir) = outcome(Ok(RawResponse::new(404, "missing"))).await;
        assert!(matches!(outcome, FetchOutcome::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_body_level_errors() {
        let (rate, _d1) = outcome(Ok(RawResponse::new(200, "rate"))).await;
        assert_eq!(rate, FetchOutcome::RateLimited { retry_after: None });

        let (auth, _d2) = outcome(Ok(RawResponse::new(200, "auth"))).await;
        assert!(matches!(auth, FetchOutcome::AuthFailure { status: 200, .. }));

        let (junk, dir) = outcome(Ok(RawResponse::new(200, "junk"))).await;
        match junk {
            FetchOutcome::MalformedResponse { archived, message } => {
                assert_eq!(message, "invalid JSON");
                assert!(archived.starts_with(dir.path()));
                assert_eq!(std::fs::read_to_string(archived).unwrap(), "junk");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_wait_hint_formats() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

        let seconds = RawResponse::new(429, "").with_header("retry-after", "30");
        assert_eq!(parse_wait_hint(&seconds, now), Some(Duration::from_secs(30)));

        let date = RawResponse::new(429, "").with_header("retry-after", "Sat, 09 Mar 2024 12:01:30 GMT");
        assert_eq!(parse_wait_hint(&date, now), Some(Duration::from_secs(90)));

        let reset = RawResponse::new(429, "")
            .with_header("x-rate-limit-reset", (now.timestamp() + 120).to_string());
        assert_eq!(parse_wait_hint(&reset, now), Some(Duration::from_secs(120)));

        let past = RawResponse::new(429, "")
            .with_header("x-rate-limit-reset", (now.timestamp() - 10).to_string());
        assert_eq!(parse_wait_hint(&past, now), Some(Duration::ZERO));

        assert_eq!(parse_wait_hint(&RawResponse::new(429, ""), now), None);
    }
}
