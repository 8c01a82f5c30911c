//! Session credentials
//!
//! Tokens never live in the config file; the config only names the
//! environment variables they are read from.

use crate::config::types::SessionConfig;
use crate::ConfigError;
use std::fmt;

/// Tokens identifying one browser session
#[derive(Clone)]
pub struct Credentials {
    pub bearer_token: String,
    pub auth_token: String,
    pub csrf_token: String,
}

impl Credentials {
    pub fn new(
        bearer_token: impl Into<String>,
        auth_token: impl Into<String>,
        csrf_token: impl Into<String>,
    ) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            auth_token: auth_token.into(),
            csrf_token: csrf_token.into(),
        }
    }

    /// Reads the tokens named by the `[session]` section from the environment
    ///
    /// # Returns
    ///
    /// * `Ok(Credentials)` - Session and CSRF tokens were found (the bearer token may be empty)
    /// * `Err(ConfigError::MissingCredential)` - A required variable is unset or empty
    pub fn from_env(session: &SessionConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(session, |name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an arbitrary variable lookup
    pub fn from_lookup<F>(session: &SessionConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(name.to_string()))
        };

        let bearer_token = lookup(&session.bearer_token_env).unwrap_or_default();
        if bearer_token.is_empty() {
            tracing::warn!(
                "{} is not set; requests will carry an empty bearer token",
                session.bearer_token_env
            );
        }

        Ok(Self {
            bearer_token,
            auth_token: required(&session.auth_token_env)?,
            csrf_token: required(&session.csrf_token_env)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer_token", &"<redacted>")
            .field("auth_token", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .finish()
    }
}
