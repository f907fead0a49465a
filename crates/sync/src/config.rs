//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_API_URL` - Base URL of the storefront REST backend
//!
//! ## Optional
//! - `STOREFRONT_API_TOKEN` - Bearer token attached to every request
//! - `STOREFRONT_API_TIMEOUT_SECS` - Request timeout (default: 10)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Default request timeout in seconds.
///
/// Unbounded network calls would leave the optimistic display stuck behind
/// an in-flight refresh, so every call is capped.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Invalid API base URL {0}: {1}")]
    InvalidBaseUrl(String, String),
}

/// Synchronization engine configuration.
///
/// Implements `Debug` manually to redact the API token.
#[derive(Clone)]
pub struct SyncConfig {
    /// Base URL of the storefront REST backend.
    pub api_base: Url,
    /// Optional bearer token attached to every request.
    pub api_token: Option<SecretString>,
    /// Bound on every network call.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_base", &self.api_base.as_str())
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SyncConfig {
    /// Build a configuration programmatically from a base URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidBaseUrl` if the URL does not parse or is
    /// not an http(s) URL.
    pub fn new(api_base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: parse_base_url(api_base)?,
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `STOREFRONT_API_URL` is missing or invalid,
    /// or if the timeout is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let raw_base = std::env::var("STOREFRONT_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("STOREFRONT_API_URL".to_owned()))?;
        let api_base = parse_base_url(&raw_base)?;

        let api_token = std::env::var("STOREFRONT_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .map(SecretString::from);

        let request_timeout = match std::env::var("STOREFRONT_API_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    ConfigError::InvalidEnvVar(
                        "STOREFRONT_API_TIMEOUT_SECS".to_owned(),
                        format!("expected a positive integer, got {raw:?}"),
                    )
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidEnvVar(
                        "STOREFRONT_API_TIMEOUT_SECS".to_owned(),
                        "timeout must be at least 1 second".to_owned(),
                    ));
                }
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_base,
            api_token,
            request_timeout,
        })
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.api_token = Some(token);
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|error| ConfigError::InvalidBaseUrl(raw.to_owned(), error.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidBaseUrl(
            raw.to_owned(),
            format!("unsupported scheme {:?}", url.scheme()),
        ));
    }
    Ok(url)
}
