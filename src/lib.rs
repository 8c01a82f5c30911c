//! Ripple-Harvest: a resumable, cursor-driven collection harvester
//!
//! This crate pages through large collections exposed by a browser-session
//! GraphQL API, merging every page into a deduplicated CSV record set and
//! checkpointing the pagination cursor after each page so that an interrupted
//! run resumes exactly where it stopped.

pub mod adapter;
pub mod config;
pub mod harvest;
pub mod output;
pub mod state;
pub mod storage;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Ripple-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Authentication rejected (HTTP {status}): {message}")]
    AuthFailure { status: u16, message: String },

    #[error("Network retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Malformed response (archived at {}): {message}", archived.display())]
    MalformedResponse { archived: PathBuf, message: String },

    #[error("Unexpected HTTP {status} (archived at {})", archived.display())]
    Rejected { status: u16, archived: PathBuf },

    #[error("Transport error: {0}")]
    Transport(#[from] harvest::TransportError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::HarvestPhase,
        to: state::HarvestPhase,
    },
}

impl HarvestError {
    /// Process exit status for this error
    ///
    /// External schedulers use the status to decide whether a resume is worth
    /// attempting: `2` needs fresh credentials, `3` needs a human to inspect the
    /// checkpoint, `4` needs a config fix, and `1` covers everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::AuthFailure { .. } => 2,
            Self::Storage(storage::StorageError::CheckpointCorrupt { .. }) => 3,
            Self::Config(_) => 4,
            _ => 1,
        }
    }

    /// Returns true if the last-known-good state is worth resuming from
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. }
                | Self::MalformedResponse { .. }
                | Self::Rejected { .. }
                | Self::Transport(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Result type alias for Ripple-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use adapter::{Adapter, ParsedPage, RequestDescriptor};
pub use config::Config;
pub use harvest::{
    run_follow_check, run_harvest, FollowCheckOptions, FollowCheckOutput, FollowCheckReport,
    HarvestOptions, HarvestOutcome, HarvestReport, Harvester,
};
pub use state::{Checkpoint, HarvestPhase};
pub use storage::{DuplicatePolicy, Record, RecordSet};
