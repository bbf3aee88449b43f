use super::algorithm::{AtomicUnit, MemberSource};
use super::clock::{Clock, SystemClock};
use super::options::LimitOptions;
use super::pipelined;
use super::redis::RedisStore;
use super::store::{QuotaStore, ALLOW, DENY};
use super::types::LimiterConfig;
use crate::config::{FailurePolicy, LimiterSettings};
use crate::error::{RateLimitError, Result, StoreError};
use crate::metrics::{record_backend_error, record_check, CheckOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Rate limiter deciding allow or deny against a shared quota store.
///
/// Every check is a single store round trip (two for the pipelined variant).
/// The limiter holds no quota state itself and performs no retries; wrap calls
/// in a timeout or retry policy at the call site if needed.
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    settings: LimiterSettings,
    clock: Arc<dyn Clock>,
    members: MemberSource,
}

impl RateLimiter {
    /// Connect to the Redis store described by `settings`
    pub async fn connect(settings: LimiterSettings) -> Result<Self> {
        settings.validate()?;
        info!(
            failure_policy = ?settings.failure_policy,
            algorithm = %settings.defaults.algorithm,
            "Initializing rate limiter with Redis backend"
        );

        let store = RedisStore::connect(&settings.store).await?;
        Self::with_store(Arc::new(store), settings)
    }

    /// Create a limiter over an existing store
    pub fn with_store(store: Arc<dyn QuotaStore>, settings: LimiterSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
            members: MemberSource::new(),
        })
    }

    /// Replace the clock timestamps are taken from
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check a request against the quota described by `options`.
    ///
    /// Returns `Ok(())` when allowed, [`RateLimitError::QuotaExceeded`] when
    /// denied, and [`RateLimitError::BackendUnavailable`] when the store failed
    /// under [`FailurePolicy::FailClosed`]. Invalid options are rejected before
    /// the store is contacted.
    pub async fn check(&self, options: LimitOptions) -> Result<()> {
        let config = options.resolve(&self.settings.defaults)?;
        self.check_config(&config).await
    }

    /// Check against the process defaults
    pub async fn default_limit(&self) -> Result<()> {
        self.check(LimitOptions::new()).await
    }

    /// At most `capacity` requests per `window_secs` for `key`
    pub async fn limit_key(&self, key: &str, capacity: u64, window_secs: u64) -> Result<()> {
        self.check(
            LimitOptions::new()
                .capacity(capacity)
                .window_secs(window_secs)
                .key(key)
                .window_scoped(true),
        )
        .await
    }

    /// At most `capacity` requests per `window_secs` for one identity
    pub async fn limit_user(&self, identity: &str, capacity: u64, window_secs: u64) -> Result<()> {
        self.check(
            LimitOptions::new()
                .capacity(capacity)
                .window_secs(window_secs)
                .key(format!("User:limit:{}", identity))
                .identity(identity)
                .user_scoped(true)
                .window_scoped(true),
        )
        .await
    }

    /// One request at a time for `key`; state is cleared once admitted
    pub async fn single_request(&self, key: &str, window_secs: u64) -> Result<()> {
        self.check(
            LimitOptions::new()
                .capacity(1)
                .window_secs(window_secs)
                .key(key)
                .window_scoped(false),
        )
        .await
    }

    /// One request at a time for an identity, keyed by the identity itself;
    /// state is cleared once admitted
    pub async fn single_user_request(&self, identity: &str, window_secs: u64) -> Result<()> {
        self.check(
            LimitOptions::new()
                .capacity(1)
                .window_secs(window_secs)
                .key(identity)
                .identity(identity)
                .user_scoped(true)
                .window_scoped(false),
        )
        .await
    }

    /// Reset the quota state of `key`
    pub async fn clear(&self, key: &str) -> Result<()> {
        self.store.delete(key).await?;
        Ok(())
    }

    /// Test the store connection
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await?;
        Ok(())
    }

    async fn check_config(&self, config: &LimiterConfig) -> Result<()> {
        let started = Instant::now();

        let (result, outcome) = match self.evaluate(config).await {
            Ok(ALLOW) => {
                debug!(
                    "Rate limit check passed for key {} ({})",
                    config.key, config.algorithm
                );
                if !config.window_scoped {
                    self.clear_after_allow(&config.key).await;
                }
                (Ok(()), CheckOutcome::Allowed)
            }
            Ok(DENY) => {
                warn!(
                    "Rate limit exceeded for key: {} ({})",
                    config.key, config.algorithm
                );
                (
                    Err(RateLimitError::QuotaExceeded {
                        key: config.key.clone(),
                    }),
                    CheckOutcome::Denied,
                )
            }
            Ok(other) => self.on_backend_error(
                config,
                StoreError::UnexpectedReply(format!("check returned {}", other)),
            ),
            Err(e) => self.on_backend_error(config, e),
        };

        record_check(
            config.algorithm.as_str(),
            outcome,
            started.elapsed().as_secs_f64(),
        );

        result
    }

    async fn evaluate(&self, config: &LimiterConfig) -> std::result::Result<i64, StoreError> {
        let now = self.clock.now_secs();
        let unit = AtomicUnit::for_config(
            config,
            now,
            &self.members,
            self.settings.defaults.token_bucket_ttl_secs,
        );

        match unit {
            Some(unit) => self.store.evaluate(&unit).await,
            None => pipelined::check_fixed_window(self.store.as_ref(), config).await,
        }
    }

    async fn clear_after_allow(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            // The request was already admitted; the key expires on its own
            warn!("Failed to clear quota state for key {}: {}", key, e);
        }
    }

    fn on_backend_error(
        &self,
        config: &LimiterConfig,
        error: StoreError,
    ) -> (Result<()>, CheckOutcome) {
        record_backend_error(config.algorithm.as_str());

        match self.settings.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(
                    "Quota store error for key {}, allowing request: {}",
                    config.key, error
                );
                (Ok(()), CheckOutcome::FailedOpen)
            }
            FailurePolicy::FailClosed => {
                error!("Quota store error for key {}: {}", config.key, error);
                (
                    Err(RateLimitError::BackendUnavailable(error)),
                    CheckOutcome::FailedClosed,
                )
            }
        }
    }
}
