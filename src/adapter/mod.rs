//! Collection adapters
//!
//! An adapter knows one paginated collection: how to build the request for a
//! cursor and how to turn a raw response body into records, the next cursor
//! and (optionally) the expected total. The harvest engine never inspects
//! response shapes itself; everything it needs comes back as a typed
//! `ParsedPage` or `ParseError`.

mod community;
mod following;

pub use community::CommunityMembersAdapter;
pub use following::FollowingAdapter;

use crate::config::CollectionConfig;
use crate::storage::Record;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// HTTP method of a request descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Everything the transport needs to issue one call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestDescriptor {
    /// Creates a GET request for `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Looks up a query parameter by name
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One successfully parsed page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub records: Vec<Record>,

    /// Cursor of the following page; `None` means the collection is exhausted
    pub next_cursor: Option<String>,

    /// Expected size of the whole collection, if the response carries it
    pub total_count: Option<u64>,

    /// Entries dropped under `SalvagePolicy::SkipEntries`
    pub skipped: usize,
}

/// Typed failure of response parsing
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("API reported rate limiting: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("API rejected the session: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Malformed(String),
}

/// What to do with individual entries that cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SalvagePolicy {
    /// Any unparseable entry fails the whole page
    #[default]
    FailPage,

    /// Unparseable entries are dropped and counted; the cursor still advances
    SkipEntries,
}

/// Request builder / response parser pair for one collection type
pub trait Adapter: Send + Sync {
    /// Identifies the collection in checkpoints and logs (e.g. `community:123`)
    fn label(&self) -> String;

    /// File name prefix for archived page responses
    fn archive_prefix(&self) -> &str;

    /// Header row of the record set
    fn columns(&self) -> &[&'static str];

    /// Index of the identity key in `columns`
    fn key_column(&self) -> usize;

    /// Builds the request for the page at `cursor` (`None` = first page)
    ///
    /// `limit` is the number of records still wanted, if the run is limited;
    /// adapters may use it to shrink the requested page size.
    fn build_request(&self, cursor: Option<&str>, limit: Option<u64>) -> RequestDescriptor;

    /// Parses a 2xx response body
    fn parse_response(&self, body: &str) -> Result<ParsedPage, ParseError>;

    /// Optional pre-flight request that reports the collection size
    fn info_request(&self) -> Option<RequestDescriptor> {
        None
    }

    /// File name prefix for archived info responses
    fn info_archive_prefix(&self) -> &str {
        self.archive_prefix()
    }

    /// Extracts the collection size from an info response
    fn parse_info(&self, body: &str) -> Result<Option<u64>, ParseError> {
        let _ = body;
        Ok(None)
    }

    fn salvage_policy(&self) -> SalvagePolicy {
        SalvagePolicy::FailPage
    }
}

/// Builds the adapter configured for a collection
///
/// # Arguments
///
/// * `collection` - The `[collection]` config section
/// * `base_url` - Origin of the API (e.g. `https://x.com`)
pub fn build_adapter(collection: &CollectionConfig, base_url: &str) -> Box<dyn Adapter> {
    match collection {
        CollectionConfig::CommunityMembers {
            community_id,
            salvage,
            ..
        } => Box::new(CommunityMembersAdapter::new(base_url, community_id).with_salvage(*salvage)),
        CollectionConfig::Following {
            user_id,
            page_size,
            salvage,
        } => Box::new(
            FollowingAdapter::new(base_url, user_id)
                .with_page_size(*page_size)
                .with_salvage(*salvage),
        ),
    }
}

/// Collects parsed entries under a salvage policy
///
/// Each entry is `Ok(Some(record))`, `Ok(None)` for entries that are
/// legitimately not records (e.g. unavailable accounts), or `Err(reason)`.
///
/// # Returns
///
/// * `Ok((records, skipped))` - Records plus the number of dropped bad entries
/// * `Err(ParseError::Malformed)` - A bad entry under `SalvagePolicy::FailPage`
pub fn collect_entries<I>(policy: SalvagePolicy, entries: I) -> Result<(Vec<Record>, usize), ParseError>
where
    I: IntoIterator<Item = Result<Option<Record>, String>>,
{
    let mut records = Vec::new();
    let mut skipped = 0;

    for (position, entry) in entries.into_iter().enumerate() {
        match entry {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(reason) => match policy {
                SalvagePolicy::FailPage => {
                    return Err(ParseError::Malformed(format!(
                        "entry {}: {}",
                        position, reason
                    )))
                }
                SalvagePolicy::SkipEntries => {
                    tracing::warn!("Skipping unparseable entry {}: {}", position, reason);
                    skipped += 1;
                }
            },
        }
    }

    Ok((records, skipped))
}

/// Parses a body as JSON and surfaces API-level errors
///
/// GraphQL endpoints answer some failures with HTTP 200 and an `errors`
/// array instead of `data`. Known codes are mapped to typed errors: 88 is
/// rate limiting, 32/89/239/326 are session problems.
pub fn parse_api_body(body: &str) -> Result<Value, ParseError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ParseError::Malformed(format!("invalid JSON: {}", e)))?;

    let has_data = value.get("data").map(|d| !d.is_null()).unwrap_or(false);
    let errors = value.get("errors").and_then(Value::as_array);

    if let (false, Some(errors)) = (has_data, errors) {
        let first = errors.first();
        let code = first.and_then(|e| e.get("code")).and_then(Value::as_i64);
        let message = first
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown API error")
            .to_string();

        return Err(match code {
            Some(88) => ParseError::RateLimited {
                retry_after: None,
                message,
            },
            Some(32) | Some(89) | Some(239) | Some(326) => ParseError::Unauthorized(message),
            _ => ParseError::Malformed(format!("API error {:?}: {}", code, message)),
        });
    }

    Ok(value)
}

/// String field, empty when missing
pub(crate) fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Boolean field rendered as `True`/`False`, the spelling existing record files use
pub(crate) fn flag_field(value: &Value, key: &str) -> String {
    let flag = value.get(key).and_then(Value::as_bool).unwrap_or(false);
    let text = if flag { "True" } else { "False" };
    text.to_string()
}

/// Numeric field, `0` when missing
pub(crate) fn count_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_u64).unwrap_or(0).to_string()
}
