//! Sync configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required for store-backed commands
//! - `OMNICRM_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Shopify (both or neither)
//! - `SHOPIFY_STORE_DOMAIN` - Store domain (e.g., your-store.myshopify.com)
//! - `SHOPIFY_ADMIN_API_ACCESS_TOKEN` - Admin API access token
//!
//! When neither is set the remote directory reports `NotConfigured` and a
//! sync batch aborts before touching any handle.
//!
//! ## Optional
//! - `SHOPIFY_API_VERSION` - API version (default: 2024-01)
//! - `SYNC_DELAY_MS` - Pause between handles (default: 1000)
//! - `SYNC_ERROR_DELAY_MS` - Pause after a failed handle (default: 2000)
//! - `SYNC_VIP_THRESHOLD` - Lifetime value above which a contact is VIP (default: 5000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_API_VERSION: &str = "2024-01";
const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_ERROR_DELAY_MS: u64 = 2000;
const DEFAULT_VIP_THRESHOLD: i64 = 5000;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Top-level sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// Shopify Admin API credentials, absent when not configured
    pub shopify: Option<ShopifyConfig>,
    /// Pacing between remote calls
    pub pacing: PacingConfig,
    /// Lifetime value strictly above which a contact is tiered VIP
    pub vip_threshold: Decimal,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
}

/// Shopify Admin REST API configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct ShopifyConfig {
    /// Shopify store domain (e.g., your-store.myshopify.com)
    pub store: String,
    /// Shopify API version (e.g., 2024-01)
    pub api_version: String,
    /// Static Admin API access token
    pub access_token: SecretString,
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store", &self.store)
            .field("api_version", &self.api_version)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Fixed delays used to stay under the remote request-rate ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Pause between two handles.
    pub delay: Duration,
    /// Pause after a handle fails.
    pub error_delay: Duration,
}

impl PacingConfig {
    /// No pauses at all (tests, dry runs).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            delay: Duration::ZERO,
            error_delay: Duration::ZERO,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            error_delay: Duration::from_millis(DEFAULT_ERROR_DELAY_MS),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed, only half of the
    /// Shopify credentials are set, or the access token looks like a
    /// placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let database_url = env
            .optional("OMNICRM_DATABASE_URL")
            .or_else(|| env.optional("DATABASE_URL"))
            .map(SecretString::from);
        let shopify = ShopifyConfig::from_env(&env)?;
        let pacing = PacingConfig {
            delay: Duration::from_millis(env.parsed("SYNC_DELAY_MS", DEFAULT_DELAY_MS)?),
            error_delay: Duration::from_millis(
                env.parsed("SYNC_ERROR_DELAY_MS", DEFAULT_ERROR_DELAY_MS)?,
            ),
        };
        let vip_threshold =
            env.parsed("SYNC_VIP_THRESHOLD", Decimal::from(DEFAULT_VIP_THRESHOLD))?;

        Ok(Self {
            database_url,
            shopify,
            pacing,
            vip_threshold,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the database URL, or an error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when no database URL was configured.
    pub fn require_database_url(&self) -> Result<&SecretString, ConfigError> {
        self.database_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("OMNICRM_DATABASE_URL".to_string()))
    }
}

impl ShopifyConfig {
    fn from_env(env: &Env<'_>) -> Result<Option<Self>, ConfigError> {
        let store = env.optional("SHOPIFY_STORE_DOMAIN");
        let token = env.optional("SHOPIFY_ADMIN_API_ACCESS_TOKEN");

        match (store, token) {
            (Some(store), Some(token)) => {
                validate_secret_strength(&token, "SHOPIFY_ADMIN_API_ACCESS_TOKEN")?;
                Ok(Some(Self {
                    store,
                    api_version: env
                        .optional("SHOPIFY_API_VERSION")
                        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                    access_token: SecretString::from(token),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SHOPIFY_*".to_string(),
                "Both SHOPIFY_STORE_DOMAIN and SHOPIFY_ADMIN_API_ACCESS_TOKEN must be set together"
                    .to_string(),
            )),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Get an optional variable, treating blank values as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Get a variable parsed into `T`, with a default when unset.
    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
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

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}
