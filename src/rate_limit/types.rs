use serde::{Deserialize, Serialize};
use std::fmt;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter per window, reset by expiry. Admits bursts across a boundary.
    FixedWindow,
    /// Timestamped log over a moving lookback. Exact, O(capacity) storage per key.
    #[default]
    SlidingWindow,
    /// Permits refilled continuously at `rate` up to `capacity`.
    TokenBucket,
    /// Best-effort fixed window over two pipelined round trips.
    ///
    /// Not atomic: concurrent callers can all read the same count before any
    /// of them increments it, so a key can admit more than `capacity` requests
    /// per window. Only use it where over-admission is acceptable.
    PipelinedFixedWindow,
}

impl Algorithm {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::PipelinedFixedWindow => "pipelined_fixed_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved configuration for a single limiter invocation
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Store key holding the quota state
    pub key: String,
    /// Maximum permits per window, or the bucket size
    pub capacity: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Keep state until it expires; when false the key is cleared after an allow
    pub window_scoped: bool,
    /// Whether the key was namespaced per identity
    pub user_scoped: bool,
    /// Algorithm evaluating this invocation
    pub algorithm: Algorithm,
    /// Token bucket refill rate in permits per second
    pub rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_labels() {
        assert_eq!(Algorithm::FixedWindow.as_str(), "fixed_window");
        assert_eq!(Algorithm::TokenBucket.to_string(), "token_bucket");
        assert_eq!(Algorithm::default(), Algorithm::SlidingWindow);
    }

    #[test]
    fn test_algorithm_deserialize() {
        let algorithm: Algorithm = serde_yaml::from_str("token_bucket").unwrap();
        assert_eq!(algorithm, Algorithm::TokenBucket);

        let algorithm: Algorithm = serde_yaml::from_str("pipelined_fixed_window").unwrap();
        assert_eq!(algorithm, Algorithm::PipelinedFixedWindow);
    }
}
