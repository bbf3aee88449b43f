use super::algorithm::{AtomicUnit, Command};
use super::lua_scripts::{FIXED_WINDOW_SCRIPT, SLIDING_WINDOW_SCRIPT, TOKEN_BUCKET_SCRIPT};
use super::store::QuotaStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, IntoConnectionInfo, RedisResult, Script};
use secrecy::ExposeSecret;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed quota store.
///
/// Atomic units run as Lua scripts (EVALSHA, loading the script on a cache
/// miss), so Redis executes each check-and-update without interleaving.
pub struct RedisStore {
    /// Multiplexed connections, used round robin
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    /// Bound on a single round trip
    response_timeout: Duration,
    fixed_window: Script,
    sliding_window: Script,
    token_bucket: Script,
}

impl RedisStore {
    /// Open `pool_size` connections to the configured Redis
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.pool_size == 0 {
            return Err(StoreError::InvalidConfig(
                "pool size must be > 0".to_string(),
            ));
        }

        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
        let addr = info.addr.clone();

        let client = redis::Client::open(info)?;
        let connect_timeout = config.connection_timeout();

        let mut connections = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
                .await
                .map_err(|_| StoreError::Timeout(connect_timeout))??;
            connections.push(manager);
        }

        info!(
            addr = ?addr,
            pool_size = config.pool_size,
            "Connected to Redis quota store"
        );

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            response_timeout: config.response_timeout(),
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.connections[index % self.connections.len()].clone()
    }

    async fn round_trip<T, F>(&self, request: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, request).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(StoreError::Timeout(self.response_timeout)),
        }
    }
}

#[async_trait]
impl QuotaStore for RedisStore {
    async fn evaluate(&self, unit: &AtomicUnit) -> Result<i64, StoreError> {
        let mut conn = self.connection();

        let invocation = match unit {
            AtomicUnit::FixedWindow {
                key,
                capacity,
                window_secs,
            } => {
                let mut invocation = self.fixed_window.prepare_invoke();
                invocation.key(key).arg(*window_secs).arg(*capacity);
                invocation
            }
            AtomicUnit::SlidingWindow {
                key,
                capacity,
                window_secs,
                now,
                member,
            } => {
                let mut invocation = self.sliding_window.prepare_invoke();
                invocation
                    .key(key)
                    .arg(*window_secs)
                    .arg(*capacity)
                    .arg(*now)
                    .arg(member);
                invocation
            }
            AtomicUnit::TokenBucket {
                key,
                capacity,
                rate,
                now,
                ttl_secs,
            } => {
                let mut invocation = self.token_bucket.prepare_invoke();
                invocation
                    .key(key)
                    .arg(*capacity)
                    .arg(*rate)
                    .arg(*now)
                    .arg(*ttl_secs);
                invocation
            }
        };

        let reply = self
            .round_trip(invocation.invoke_async::<_, i64>(&mut conn))
            .await?;

        debug!(
            "Script {} for key {} returned {}",
            unit.algorithm(),
            unit.key(),
            reply
        );

        Ok(reply)
    }

    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Option<i64>>, StoreError> {
        let mut conn = self.connection();

        let mut pipe = redis::pipe();
        for command in commands {
            match command {
                Command::Get(key) => pipe.cmd("GET").arg(key),
                Command::Ttl(key) => pipe.cmd("TTL").arg(key),
                Command::Incr(key) => pipe.cmd("INCR").arg(key),
                Command::Expire(key, secs) => pipe.cmd("EXPIRE").arg(key).arg(*secs),
                Command::Del(key) => pipe.cmd("DEL").arg(key),
            };
        }

        let values = self
            .round_trip(pipe.query_async::<_, Vec<redis::Value>>(&mut conn))
            .await?;

        if values.len() != commands.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "sent {} commands, received {} replies",
                commands.len(),
                values.len()
            )));
        }

        values
            .iter()
            .map(|value| redis::from_redis_value::<Option<i64>>(value).map_err(StoreError::from))
            .collect()
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection();
        self.round_trip(redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        self.round_trip(redis::cmd("PING").query_async::<_, ()>(&mut conn))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::{ALLOW, DENY};

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    async fn create_test_store() -> RedisStore {
        RedisStore::connect(&StoreConfig::default())
            .await
            .expect("Failed to connect to Redis")
    }

    fn test_key(name: &str) -> String {
        format!("ratekeeper:test:{}:{}", name, rand::random::<u32>())
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_pool() {
        let config = StoreConfig {
            pool_size: 0,
            ..StoreConfig::default()
        };

        let result = RedisStore::connect(&config).await;
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window() {
        let store = create_test_store().await;
        let key = test_key("fw");

        for i in 0..3 {
            let unit = AtomicUnit::FixedWindow {
                key: key.clone(),
                capacity: 3,
                window_secs: 10,
            };
            assert_eq!(store.evaluate(&unit).await.unwrap(), ALLOW, "request {}", i);
        }

        let unit = AtomicUnit::FixedWindow {
            key: key.clone(),
            capacity: 3,
            window_secs: 10,
        };
        assert_eq!(store.evaluate(&unit).await.unwrap(), DENY);

        let ttl = store.pipeline(&[Command::Ttl(key.clone())]).await.unwrap();
        assert!(ttl[0].unwrap() > 0 && ttl[0].unwrap() <= 10);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_sliding_window() {
        let store = create_test_store().await;
        let key = test_key("sw");
        let now = 1_700_000_000;

        for i in 0..3 {
            let unit = AtomicUnit::SlidingWindow {
                key: key.clone(),
                capacity: 3,
                window_secs: 10,
                now,
                member: format!("m{}", i),
            };
            assert_eq!(store.evaluate(&unit).await.unwrap(), ALLOW);
        }

        let unit = AtomicUnit::SlidingWindow {
            key: key.clone(),
            capacity: 3,
            window_secs: 10,
            now: now + 5,
            member: "m3".to_string(),
        };
        assert_eq!(store.evaluate(&unit).await.unwrap(), DENY);

        let unit = AtomicUnit::SlidingWindow {
            key: key.clone(),
            capacity: 3,
            window_secs: 10,
            now: now + 11,
            member: "m4".to_string(),
        };
        assert_eq!(store.evaluate(&unit).await.unwrap(), ALLOW);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_token_bucket() {
        let store = create_test_store().await;
        let key = test_key("tb");
        let now = 1_700_000_000;

        let unit = |now| AtomicUnit::TokenBucket {
            key: key.clone(),
            capacity: 2,
            rate: 0.5,
            now,
            ttl_secs: 600,
        };

        assert_eq!(store.evaluate(&unit(now)).await.unwrap(), ALLOW);
        assert_eq!(store.evaluate(&unit(now)).await.unwrap(), ALLOW);
        assert_eq!(store.evaluate(&unit(now)).await.unwrap(), DENY);
        assert_eq!(store.evaluate(&unit(now + 1)).await.unwrap(), DENY);
        assert_eq!(store.evaluate(&unit(now + 2)).await.unwrap(), ALLOW);

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_pipeline_replies_in_order() {
        let store = create_test_store().await;
        let key = test_key("pipe");

        let replies = store
            .pipeline(&[
                Command::Get(key.clone()),
                Command::Incr(key.clone()),
                Command::Expire(key.clone(), 30),
                Command::Get(key.clone()),
                Command::Del(key.clone()),
            ])
            .await
            .unwrap();

        assert_eq!(replies, vec![None, Some(1), Some(1), Some(1), Some(1)]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = create_test_store().await;
        assert!(store.ping().await.is_ok());
    }
}
