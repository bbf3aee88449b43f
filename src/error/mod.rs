use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Result type for limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors raised by a quota store round trip
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}

/// Limiter error types
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for key: {key}")]
    QuotaExceeded { key: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] StoreError),

    #[error("Invalid limiter configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RateLimitError {
    /// Get the HTTP status code a deny response should carry
    pub fn status_code(&self) -> StatusCode {
        match self {
            RateLimitError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            RateLimitError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RateLimitError::ConfigurationInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RateLimitError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is a plain quota denial
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, RateLimitError::QuotaExceeded { .. })
    }
}
