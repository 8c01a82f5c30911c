use crate::config::types::{
    CollectionConfig, Config, FollowCheckConfig, HarvestConfig, OutputConfig, RetryConfig,
    SessionConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_session_config(&config.session)?;
    validate_harvest_config(&config.harvest)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    validate_collection_config(&config.collection)?;
    validate_follow_check_config(&config.follow_check)?;
    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "base-url must use http or https, got '{}'",
            config.base_url
        )));
    }

    for (name, value) in [
        ("bearer-token-env", &config.bearer_token_env),
        ("auth-token-env", &config.auth_token_env),
        ("csrf-token-env", &config.csrf_token_env),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates harvest loop configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.limit == Some(0) {
        return Err(ConfigError::Validation(
            "limit must be >= 1 when set".to_string(),
        ));
    }

    if config.max_empty_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-empty-pages must be >= 1, got {}",
            config.max_empty_pages
        )));
    }

    Ok(())
}

/// Validates backoff configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_network_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-network-attempts must be >= 1, got {}",
            config.max_network_attempts
        )));
    }

    if config.rate_limit_fallback_secs < 1 {
        return Err(ConfigError::Validation(
            "rate-limit-fallback-secs must be >= 1".to_string(),
        ));
    }

    if config.rate_limit_max_wait_secs < config.rate_limit_fallback_secs {
        return Err(ConfigError::Validation(format!(
            "rate-limit-max-wait-secs ({}) must be >= rate-limit-fallback-secs ({})",
            config.rate_limit_max_wait_secs, config.rate_limit_fallback_secs
        )));
    }

    if config.network_max_delay_secs < config.network_base_delay_secs {
        return Err(ConfigError::Validation(format!(
            "network-max-delay-secs ({}) must be >= network-base-delay-secs ({})",
            config.network_max_delay_secs, config.network_base_delay_secs
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.records_path.is_empty() {
        return Err(ConfigError::Validation(
            "records-path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "checkpoint-path cannot be empty when set".to_string(),
        ));
    }

    if config.archive_dir.is_empty() {
        return Err(ConfigError::Validation(
            "archive-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the collection section
fn validate_collection_config(config: &CollectionConfig) -> Result<(), ConfigError> {
    validate_numeric_id(config.kind(), config.target_id())?;

    if let CollectionConfig::Following { page_size, .. } = config {
        if !(1..=100).contains(page_size) {
            return Err(ConfigError::Validation(format!(
                "page-size must be between 1 and 100, got {}",
                page_size
            )));
        }
    }

    Ok(())
}

/// Validates follow-check tuning
fn validate_follow_check_config(config: &FollowCheckConfig) -> Result<(), ConfigError> {
    if !(1..=100).contains(&config.page_size) {
        return Err(ConfigError::Validation(format!(
            "follow-check page-size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "follow-check max-pages must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates a numeric community/user id
fn validate_numeric_id(kind: &str, id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} collection needs a non-empty id",
            kind
        )));
    }

    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "{} id must be numeric, got '{}'",
            kind, id
        )));
    }

    Ok(())
}
