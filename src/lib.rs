pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

pub use crate::config::{FailurePolicy, LimiterSettings};
pub use crate::error::{RateLimitError, Result, StoreError};
pub use crate::rate_limit::{Algorithm, LimitOptions, RateLimiter};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratekeeper=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
