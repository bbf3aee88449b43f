use crate::error::{RateLimitError, Result};
use crate::rate_limit::algorithm::DEFAULT_TOKEN_BUCKET_TTL_SECS;
use crate::rate_limit::types::Algorithm;
use secrecy::Secret;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Secret string wrapper that prevents accidental exposure
pub type SecretString = Secret<String>;

/// Prefix for environment variables overriding file settings,
/// e.g. `RATEKEEPER__STORE__URL`
pub const ENV_PREFIX: &str = "RATEKEEPER";

/// Main limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterSettings {
    /// Store connection
    #[serde(default)]
    pub store: StoreConfig,
    /// Process-wide defaults filled into every invocation
    #[serde(default)]
    pub defaults: LimitDefaults,
    /// What a check returns when the store cannot answer. Always explicit.
    pub failure_policy: FailurePolicy,
}

/// Behavior when the store fails or times out
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Surface `BackendUnavailable`; callers treat it as a deny
    FailClosed,
    /// Log the failure and allow the request
    FailOpen,
}

/// Store connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Password, overriding any password in the URL
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Number of multiplexed connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Time allowed for establishing each connection (milliseconds)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Time allowed for a single round trip (milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Defaults applied after all options of an invocation
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LimitDefaults {
    /// Capacity when none is given
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// Window length when none is given (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Namespace of derived keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Algorithm when none is given
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Idle expiry of token buckets (seconds)
    #[serde(default = "default_token_bucket_ttl_secs")]
    pub token_bucket_ttl_secs: u64,
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_capacity() -> u64 {
    1
}

fn default_window_secs() -> u64 {
    10
}

fn default_key_prefix() -> String {
    "ratekeeper".to_string()
}

fn default_token_bucket_ttl_secs() -> u64 {
    DEFAULT_TOKEN_BUCKET_TTL_SECS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            password: None,
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for LimitDefaults {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            key_prefix: default_key_prefix(),
            algorithm: Algorithm::default(),
            token_bucket_ttl_secs: default_token_bucket_ttl_secs(),
        }
    }
}

impl LimiterSettings {
    /// Settings with default store and limit defaults. The failure policy has
    /// no default and must be chosen.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            store: StoreConfig::default(),
            defaults: LimitDefaults::default(),
            failure_policy,
        }
    }

    /// Load settings from a YAML file, then apply `RATEKEEPER__*` environment
    /// overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RateLimitError::Config(format!("Failed to read settings: {}", e)))?;

        loaded
            .try_deserialize()
            .map_err(|e| RateLimitError::Config(format!("Failed to parse settings: {}", e)))
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse settings: {}", e)))
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.store.url.is_empty() {
            return Err(RateLimitError::ConfigurationInvalid(
                "Store URL cannot be empty".to_string(),
            ));
        }
        if self.store.pool_size == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "Store pool size must be > 0".to_string(),
            ));
        }
        if self.store.response_timeout_ms == 0 || self.store.connection_timeout_ms == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "Store timeouts must be > 0".to_string(),
            ));
        }
        if self.defaults.capacity == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "Default capacity must be > 0".to_string(),
            ));
        }
        if self.defaults.window_secs == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "Default window must be > 0".to_string(),
            ));
        }
        if self.defaults.key_prefix.is_empty() {
            return Err(RateLimitError::ConfigurationInvalid(
                "Key prefix cannot be empty".to_string(),
            ));
        }
        if self.defaults.token_bucket_ttl_secs == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "Token bucket expiry must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
