//! Storefront client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `MARKETSTALL_API_URL` - Store API base URL (default: `http://127.0.0.1:8000/store/`)
//! - `MARKETSTALL_API_TOKEN` - Bearer token sent to the store API
//! - `MARKETSTALL_REQUEST_TIMEOUT_MS` - Timeout for one HTTP request (default: 10000)
//! - `MARKETSTALL_MAX_RETRIES` - Transport retries per cart or catalog call (default: 2)
//! - `MARKETSTALL_CATALOG_TTL_SECS` - Product cache TTL (default: 300)
//! - `MARKETSTALL_IDENTITY_FILE` - Where the anonymous cart token is kept
//!   (default: `.marketstall/cart.json`)
//! - `MARKETSTALL_CURRENCY` - Currency used for empty-cart totals (default: USD)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use marketstall_core::CurrencyCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/store/";
const DEFAULT_IDENTITY_FILE: &str = ".marketstall/cart.json";

/// Pause before retry `n` is `n` times this.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "todo",
    "insert",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront client configuration.
///
/// Implements `Debug` manually to redact the API token.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Store API base URL, always ending in `/`
    pub api_url: Url,
    /// Optional bearer token for the store API
    pub api_token: Option<SecretString>,
    /// Upper bound for a single HTTP request
    pub request_timeout: Duration,
    /// Transport-level retries per cart or catalog call
    pub max_retries: u32,
    /// Product cache time-to-live
    pub catalog_ttl: Duration,
    /// File holding the anonymous cart token
    pub identity_file: PathBuf,
    /// Currency for totals of empty carts
    pub currency: CurrencyCode,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("catalog_ttl", &self.catalog_ttl)
            .field("identity_file", &self.identity_file)
            .field("currency", &self.currency)
            .field("sentry_dsn", &self.sentry_dsn)
            .field("sentry_environment", &self.sentry_environment)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid, or if the
    /// API token looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`StorefrontConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = parse_api_url(
            &lookup("MARKETSTALL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        )?;

        let api_token = match lookup("MARKETSTALL_API_TOKEN").filter(|v| !v.is_empty()) {
            Some(token) => {
                validate_secret_strength(&token, "MARKETSTALL_API_TOKEN")?;
                Some(SecretString::from(token))
            }
            None => None,
        };

        let timeout_ms: u64 = parse_or_default(&lookup, "MARKETSTALL_REQUEST_TIMEOUT_MS", 10_000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "MARKETSTALL_REQUEST_TIMEOUT_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            api_url,
            api_token,
            request_timeout: Duration::from_millis(timeout_ms),
            max_retries: parse_or_default(&lookup, "MARKETSTALL_MAX_RETRIES", 2)?,
            catalog_ttl: Duration::from_secs(parse_or_default(
                &lookup,
                "MARKETSTALL_CATALOG_TTL_SECS",
                300,
            )?),
            identity_file: lookup("MARKETSTALL_IDENTITY_FILE")
                .map_or_else(|| PathBuf::from(DEFAULT_IDENTITY_FILE), PathBuf::from),
            currency: parse_or_default(&lookup, "MARKETSTALL_CURRENCY", CurrencyCode::USD)?,
            sentry_dsn: lookup("SENTRY_DSN").filter(|v| !v.is_empty()),
            sentry_environment: lookup("SENTRY_ENVIRONMENT").filter(|v| !v.is_empty()),
        })
    }

    /// Configuration pointing at `api_url` with every other value defaulted.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL does not parse.
    pub fn for_api_url(api_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.to_string();
        Self::from_lookup(move |key| (key == "MARKETSTALL_API_URL").then(|| api_url.clone()))
    }

    /// Longest a retried remote call may take: every attempt at
    /// `request_timeout` plus the backoff between them.
    #[must_use]
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff_steps = self.max_retries.saturating_mul(attempts) / 2;
        self.request_timeout
            .saturating_mul(attempts)
            .saturating_add(RETRY_BACKOFF.saturating_mul(backoff_steps))
    }

    /// Returns the bearer token, if configured.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_token.as_ref().map(|token| token.expose_secret())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse the base URL, forcing a trailing slash so relative joins keep the path.
fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| {
        ConfigError::InvalidEnvVar("MARKETSTALL_API_URL".to_string(), e.to_string())
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            "MARKETSTALL_API_URL".to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

/// Reject secrets that are obviously placeholders.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    Ok(())
}
