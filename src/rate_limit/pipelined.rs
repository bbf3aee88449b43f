//! Best-effort, non-atomic fixed window.
//!
//! The count is read in one pipelined round trip and written in a second one.
//! Between the two, any number of concurrent callers can read the same count,
//! each decide there is room, and each increment: the key admits more than
//! `capacity` requests per window. Use [`Algorithm::FixedWindow`] whenever the
//! limit has to hold.
//!
//! [`Algorithm::FixedWindow`]: super::types::Algorithm::FixedWindow

use super::algorithm::Command;
use super::store::{QuotaStore, ALLOW, DENY};
use super::types::LimiterConfig;
use crate::error::StoreError;
use tracing::debug;

/// Run the fixed window check as read, compare in the client, then write.
///
/// Returns [`ALLOW`] or [`DENY`] like an atomic unit would.
pub async fn check_fixed_window(
    store: &dyn QuotaStore,
    config: &LimiterConfig,
) -> Result<i64, StoreError> {
    let key = &config.key;

    let replies = store
        .pipeline(&[Command::Get(key.clone()), Command::Ttl(key.clone())])
        .await?;
    let (count, ttl) = match replies.as_slice() {
        [count, Some(ttl)] => (count.unwrap_or(0), *ttl),
        _ => {
            return Err(StoreError::UnexpectedReply(format!(
                "GET/TTL pipeline returned {:?}",
                replies
            )))
        }
    };

    if count >= i64::try_from(config.capacity).unwrap_or(i64::MAX) {
        return Ok(DENY);
    }

    // Not linearized with the read above
    let mut write = vec![Command::Incr(key.clone())];
    if ttl < 0 {
        write.push(Command::Expire(key.clone(), config.window_secs));
    }
    store.pipeline(&write).await?;

    debug!(
        "Pipelined fixed window admitted key {} at count {}",
        key,
        count + 1
    );

    Ok(ALLOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::local::MemoryStore;
    use crate::rate_limit::types::Algorithm;
    use std::sync::Arc;

    fn config(capacity: u64) -> LimiterConfig {
        LimiterConfig {
            key: "pipelined".to_string(),
            capacity,
            window_secs: 10,
            window_scoped: true,
            user_scoped: false,
            algorithm: Algorithm::PipelinedFixedWindow,
            rate: 0.1,
        }
    }

    #[tokio::test]
    async fn test_capacity_beyond_counter_range_allows() {
        let store = MemoryStore::with_clock(Arc::new(ManualClock::new(1000)));

        for _ in 0..3 {
            assert_eq!(
                check_fixed_window(&store, &config(u64::MAX)).await.unwrap(),
                ALLOW
            );
        }
    }

    #[tokio::test]
    async fn test_sequential_calls_respect_capacity() {
        let clock = ManualClock::new(1000);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));

        for _ in 0..3 {
            assert_eq!(check_fixed_window(&store, &config(3)).await.unwrap(), ALLOW);
        }
        assert_eq!(check_fixed_window(&store, &config(3)).await.unwrap(), DENY);

        let ttl = store
            .pipeline(&[Command::Ttl("pipelined".to_string())])
            .await
            .unwrap();
        assert_eq!(ttl, vec![Some(10)]);

        clock.advance(10);
        assert_eq!(check_fixed_window(&store, &config(3)).await.unwrap(), ALLOW);
    }
}
