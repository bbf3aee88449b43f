//! Limiter invocation options.
//!
//! Options are applied in order, later ones overriding earlier ones that touch
//! the same field. Only after every option is applied does [`LimitOptions::resolve`]
//! fill the gaps from [`LimitDefaults`] and derive a key.

use super::types::{Algorithm, LimiterConfig};
use crate::config::LimitDefaults;
use crate::error::{RateLimitError, Result};

/// A single named option
#[derive(Debug, Clone, PartialEq)]
pub enum LimitOption {
    /// Store key, overriding the derived one
    Key(String),
    /// Permits per window
    Capacity(u64),
    /// Window length in seconds
    WindowSecs(u64),
    /// Keep state until expiry (`true`) or clear it after an allow (`false`,
    /// the default)
    WindowScoped(bool),
    /// Namespace the derived key per identity
    UserScoped(bool),
    Algorithm(Algorithm),
    /// Token bucket refill rate in permits per second
    Rate(f64),
    /// Caller identity used for key derivation
    Identity(String),
    /// Route used for key derivation
    Route(String),
}

impl LimitOption {
    pub fn apply(self, options: &mut LimitOptions) {
        match self {
            LimitOption::Key(key) => options.key = Some(key),
            LimitOption::Capacity(capacity) => options.capacity = Some(capacity),
            LimitOption::WindowSecs(secs) => options.window_secs = Some(secs),
            LimitOption::WindowScoped(scoped) => options.window_scoped = Some(scoped),
            LimitOption::UserScoped(scoped) => options.user_scoped = Some(scoped),
            LimitOption::Algorithm(algorithm) => options.algorithm = Some(algorithm),
            LimitOption::Rate(rate) => options.rate = Some(rate),
            LimitOption::Identity(identity) => options.identity = Some(identity),
            LimitOption::Route(route) => options.route = Some(route),
        }
    }
}

/// Options of one limiter invocation; unset fields take defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOptions {
    pub key: Option<String>,
    pub capacity: Option<u64>,
    pub window_secs: Option<u64>,
    pub window_scoped: Option<bool>,
    pub user_scoped: Option<bool>,
    pub algorithm: Option<Algorithm>,
    pub rate: Option<f64>,
    pub identity: Option<String>,
    pub route: Option<String>,
}

impl LimitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one option
    pub fn with(mut self, option: LimitOption) -> Self {
        option.apply(&mut self);
        self
    }

    pub fn key(self, key: impl Into<String>) -> Self {
        self.with(LimitOption::Key(key.into()))
    }

    pub fn capacity(self, capacity: u64) -> Self {
        self.with(LimitOption::Capacity(capacity))
    }

    pub fn window_secs(self, secs: u64) -> Self {
        self.with(LimitOption::WindowSecs(secs))
    }

    pub fn window_scoped(self, scoped: bool) -> Self {
        self.with(LimitOption::WindowScoped(scoped))
    }

    pub fn user_scoped(self, scoped: bool) -> Self {
        self.with(LimitOption::UserScoped(scoped))
    }

    pub fn algorithm(self, algorithm: Algorithm) -> Self {
        self.with(LimitOption::Algorithm(algorithm))
    }

    pub fn rate(self, rate: f64) -> Self {
        self.with(LimitOption::Rate(rate))
    }

    pub fn identity(self, identity: impl Into<String>) -> Self {
        self.with(LimitOption::Identity(identity.into()))
    }

    pub fn route(self, route: impl Into<String>) -> Self {
        self.with(LimitOption::Route(route.into()))
    }

    /// Fill unset fields from `defaults` and derive the key.
    ///
    /// Explicit zero capacity or window, or a rate that is not a positive
    /// finite number, is rejected. An empty key counts as unset.
    pub fn resolve(&self, defaults: &LimitDefaults) -> Result<LimiterConfig> {
        let capacity = match self.capacity {
            Some(0) => {
                return Err(RateLimitError::ConfigurationInvalid(
                    "capacity must be > 0".to_string(),
                ))
            }
            Some(capacity) => capacity,
            None => defaults.capacity,
        };

        let window_secs = match self.window_secs {
            Some(0) => {
                return Err(RateLimitError::ConfigurationInvalid(
                    "window must be > 0".to_string(),
                ))
            }
            Some(secs) => secs,
            None => defaults.window_secs,
        };

        if capacity == 0 || window_secs == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "defaults must have capacity and window > 0".to_string(),
            ));
        }

        let rate = match self.rate {
            Some(rate) if !rate.is_finite() || rate <= 0.0 => {
                return Err(RateLimitError::ConfigurationInvalid(format!(
                    "rate must be a positive number, got {}",
                    rate
                )))
            }
            Some(rate) => rate,
            None => capacity as f64 / window_secs as f64,
        };

        let user_scoped = self.user_scoped.unwrap_or(false);

        let key = match self.key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => derive_key(
                &defaults.key_prefix,
                user_scoped,
                self.identity.as_deref(),
                self.route.as_deref(),
            ),
        };

        Ok(LimiterConfig {
            key,
            capacity,
            window_secs,
            window_scoped: self.window_scoped.unwrap_or(false),
            user_scoped,
            algorithm: self.algorithm.unwrap_or(defaults.algorithm),
            rate,
        })
    }
}

impl FromIterator<LimitOption> for LimitOptions {
    fn from_iter<I: IntoIterator<Item = LimitOption>>(iter: I) -> Self {
        let mut options = LimitOptions::default();
        options.extend(iter);
        options
    }
}

impl Extend<LimitOption> for LimitOptions {
    fn extend<I: IntoIterator<Item = LimitOption>>(&mut self, iter: I) {
        for option in iter {
            option.apply(self);
        }
    }
}

/// Derive a key from the invocation context.
///
/// Identity wins when the invocation is user scoped, then the route, then a
/// key shared by every caller.
pub fn derive_key(
    prefix: &str,
    user_scoped: bool,
    identity: Option<&str>,
    route: Option<&str>,
) -> String {
    match (user_scoped, identity, route) {
        (true, Some(identity), _) if !identity.is_empty() => {
            format!("{}:user:{}", prefix, identity)
        }
        (_, _, Some(route)) if !route.is_empty() => format!("{}:route:{}", prefix, route),
        _ => format!("{}:common", prefix),
    }
}
