//! HTTP transport
//!
//! This module performs single HTTP calls for the harvester:
//! - Building the reqwest client with browser-session defaults
//! - Attaching bearer token, CSRF token and session cookies
//! - Returning status, headers and body without interpreting them
//!
//! Classification of the response happens one layer up in the fetcher.

use crate::adapter::{Method, RequestDescriptor};
use crate::config::{Credentials, SessionConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// A response as received, before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,

    /// Header names are lowercased
    pub headers: HashMap<String, String>,

    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Failure to obtain any response at all
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns true if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_) | Self::Other(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else {
            Self::Other(error.to_string())
        }
    }
}

/// Performs exactly one HTTP call per `send`
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError>;
}

/// Builds the HTTP client used for API calls
///
/// # Arguments
///
/// * `config` - The `[session]` configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &SessionConfig) -> Result<Client, reqwest::Error> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Production transport on top of reqwest
pub struct ReqwestTransport {
    client: Client,
    credentials: Credentials,
}

impl ReqwestTransport {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Builds the client from the session config and wraps it
    pub fn from_config(
        config: &SessionConfig,
        credentials: Credentials,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?, credentials))
    }

    /// Headers a logged-in web client sends with every API call
    fn session_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("accept", "*/*".to_string()),
            ("accept-language", "en-US,en;q=0.9".to_string()),
            (
                "authorization",
                format!("Bearer {}", self.credentials.bearer_token),
            ),
            ("content-type", "application/json".to_string()),
            ("priority", "u=1, i".to_string()),
            ("sec-fetch-dest", "empty".to_string()),
            ("sec-fetch-mode", "cors".to_string()),
            ("sec-fetch-site", "same-origin".to_string()),
            ("x-csrf-token", self.credentials.csrf_token.clone()),
            ("x-twitter-active-user", "yes".to_string()),
            ("x-twitter-auth-type", "OAuth2Session".to_string()),
            ("x-twitter-client-language", "en".to_string()),
        ]
    }

    fn header_map(&self, request: &RequestDescriptor) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();

        let defaults = self
            .session_headers()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value));
        // Request-specific headers override the session defaults
        for (name, value) in defaults.chain(request.headers.iter().cloned()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let cookie = std::iter::once(("auth_token", self.credentials.auth_token.as_str()))
            .chain(std::iter::once(("ct0", self.credentials.csrf_token.as_str())))
            .chain(request.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        let cookie = HeaderValue::from_str(&cookie)
            .map_err(|e| TransportError::InvalidRequest(format!("cookie: {}", e)))?;
        headers.insert(reqwest::header::COOKIE, cookie);

        Ok(headers)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        let mut builder = builder
            .query(&request.query)
            .headers(self.header_map(request)?);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        tracing::debug!("{:?} {}", request.method, request.url);
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
