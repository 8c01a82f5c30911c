//! Configuration module for Ripple-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and reading session credentials from the environment.
//!
//! # Example
//!
//! ```no_run
//! use ripple_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting a {} collection", config.collection.kind());
//! ```

mod credentials;
mod parser;
mod types;
mod validation;

// Re-export types
pub use credentials::Credentials;
pub use types::{
    CollectionConfig, Config, FollowCheckConfig, HarvestConfig, OutputConfig, RetryConfig,
    SessionConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::validate;
