use crate::adapter::SalvagePolicy;
use crate::storage::DuplicatePolicy;
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Ripple-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub collection: CollectionConfig,
    #[serde(rename = "follow-check", default)]
    pub follow_check: FollowCheckConfig,
}

impl Config {
    pub fn records_path(&self) -> PathBuf {
        PathBuf::from(&self.output.records_path)
    }

    /// Checkpoint location, `<records stem>_metadata.json` unless configured
    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.output.checkpoint_path {
            Some(path) => PathBuf::from(path),
            None => crate::storage::checkpoint_path_for(&self.records_path()),
        }
    }
}

/// Browser-session parameters of the API
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Origin of the API
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(rename = "bearer-token-env", default = "default_bearer_env")]
    pub bearer_token_env: String,

    /// Environment variable holding the `auth_token` session cookie
    #[serde(rename = "auth-token-env", default = "default_auth_env")]
    pub auth_token_env: String,

    /// Environment variable holding the CSRF token (`ct0` cookie)
    #[serde(rename = "csrf-token-env", default = "default_csrf_env")]
    pub csrf_token_env: String,

    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            bearer_token_env: default_bearer_env(),
            auth_token_env: default_auth_env(),
            csrf_token_env: default_csrf_env(),
            user_agent: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Run-level behaviour of the pagination loop
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Stop once this many new records were added in one run
    #[serde(default)]
    pub limit: Option<u64>,

    /// Politeness delay between page requests (milliseconds)
    #[serde(rename = "page-delay-ms", default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Consecutive pages without records before the run counts as stalled
    #[serde(rename = "max-empty-pages", default = "default_max_empty_pages")]
    pub max_empty_pages: u32,

    #[serde(rename = "duplicate-policy", default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            limit: None,
            page_delay_ms: default_page_delay(),
            max_empty_pages: default_max_empty_pages(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Backoff parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Wait used when a rate-limited response carries no hint (seconds)
    #[serde(rename = "rate-limit-fallback-secs", default = "default_rate_limit_fallback")]
    pub rate_limit_fallback_secs: u64,

    /// Upper bound for any single rate-limit wait (seconds)
    #[serde(rename = "rate-limit-max-wait-secs", default = "default_rate_limit_max_wait")]
    pub rate_limit_max_wait_secs: u64,

    /// Double the fallback wait for every consecutive rate-limit hit
    #[serde(rename = "escalate-rate-limit-wait", default)]
    pub escalate_rate_limit_wait: bool,

    #[serde(rename = "max-network-attempts", default = "default_max_network_attempts")]
    pub max_network_attempts: u32,

    #[serde(rename = "network-base-delay-secs", default = "default_network_base_delay")]
    pub network_base_delay_secs: u64,

    #[serde(rename = "network-max-delay-secs", default = "default_network_max_delay")]
    pub network_max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_fallback_secs: default_rate_limit_fallback(),
            rate_limit_max_wait_secs: default_rate_limit_max_wait(),
            escalate_rate_limit_wait: false,
            max_network_attempts: default_max_network_attempts(),
            network_base_delay_secs: default_network_base_delay(),
            network_max_delay_secs: default_network_max_delay(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the CSV record set
    #[serde(rename = "records-path")]
    pub records_path: String,

    /// Path to the checkpoint document; derived from `records-path` when absent
    #[serde(rename = "checkpoint-path", default)]
    pub checkpoint_path: Option<String>,

    /// Directory receiving one file per HTTP response
    #[serde(rename = "archive-dir", default = "default_archive_dir")]
    pub archive_dir: String,
}

/// The collection to harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CollectionConfig {
    /// Members of one community
    CommunityMembers {
        #[serde(rename = "community-id")]
        community_id: String,

        /// Query the member count before paging
        #[serde(rename = "fetch-info", default = "default_true")]
        fetch_info: bool,

        #[serde(default)]
        salvage: SalvagePolicy,
    },

    /// Accounts followed by one user
    Following {
        #[serde(rename = "user-id")]
        user_id: String,

        #[serde(rename = "page-size", default = "default_page_size")]
        page_size: u32,

        #[serde(default)]
        salvage: SalvagePolicy,
    },
}

impl CollectionConfig {
    /// The community or user id this collection is keyed on
    pub fn target_id(&self) -> &str {
        match self {
            Self::CommunityMembers { community_id, .. } => community_id,
            Self::Following { user_id, .. } => user_id,
        }
    }

    /// Whether a pre-flight info request should be made
    pub fn fetch_info(&self) -> bool {
        match self {
            Self::CommunityMembers { fetch_info, .. } => *fetch_info,
            Self::Following { .. } => false,
        }
    }

    /// Replaces the community or user id (CLI override)
    pub fn set_target_id(&mut self, id: &str) {
        match self {
            Self::CommunityMembers { community_id, .. } => *community_id = id.to_string(),
            Self::Following { user_id, .. } => *user_id = id.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommunityMembers { .. } => "community-members",
            Self::Following { .. } => "following",
        }
    }
}

/// Tuning for follow checks (`--target`) over a harvested records file
#[derive(Debug, Clone, Deserialize)]
pub struct FollowCheckConfig {
    /// Users requested per page of a member's following list
    #[serde(rename = "page-size", default = "default_follow_check_page_size")]
    pub page_size: u32,

    /// Give up on one member after this many pages; unbounded when absent
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Write username lists of followers and non-followers instead of one results file
    #[serde(default)]
    pub separate: bool,

    #[serde(default)]
    pub salvage: SalvagePolicy,
}

impl Default for FollowCheckConfig {
    fn default() -> Self {
        Self {
            page_size: default_follow_check_page_size(),
            max_pages: None,
            separate: false,
            salvage: SalvagePolicy::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://x.com".to_string()
}

fn default_bearer_env() -> String {
    "TWITTER_BEARER_TOKEN".to_string()
}

fn default_auth_env() -> String {
    "TWITTER_AUTH_TOKEN".to_string()
}

fn default_csrf_env() -> String {
    "TWITTER_CSRF_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_page_delay() -> u64 {
    1000
}

fn default_max_empty_pages() -> u32 {
    3
}

fn default_rate_limit_fallback() -> u64 {
    60
}

fn default_rate_limit_max_wait() -> u64 {
    900
}

fn default_max_network_attempts() -> u32 {
    5
}

fn default_network_base_delay() -> u64 {
    10
}

fn default_network_max_delay() -> u64 {
    300
}

fn default_archive_dir() -> String {
    "twitter_response_logs".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_follow_check_page_size() -> u32 {
    100
}

fn default_true() -> bool {
    true
}
