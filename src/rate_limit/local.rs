use super::algorithm::{
    fixed_window_step, token_bucket_step, AtomicUnit, BucketState, Command, WindowLog,
};
use super::clock::{Clock, SystemClock};
use super::store::{QuotaStore, ALLOW, DENY};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Store operations between two sweeps of expired keys
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Value held under a key
#[derive(Debug, Clone)]
enum StoredValue {
    Counter(i64),
    Log(WindowLog),
    Bucket(BucketState),
}

#[derive(Debug, Clone, Default)]
struct Slot {
    value: Option<StoredValue>,
    /// Unix second at which the key disappears
    expires_at: Option<u64>,
}

impl Slot {
    fn is_live(&self, now: u64) -> bool {
        self.value.is_some() && self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process quota store.
///
/// Each atomic unit runs while holding the key's map shard lock, which gives
/// the same per-key linearizability Redis gives a script. Expiry follows the
/// store's clock. Every call first yields to the scheduler once, standing in
/// for the network hop, so concurrent callers interleave between round trips
/// the way they would against a remote store.
///
/// Expired keys are dropped lazily when touched, and every `sweep_interval`
/// store operations all expired keys are swept, so the map stays bounded by
/// the keys live within the last interval.
///
/// State is local to the process: use it for tests, development, or a single
/// instance deployment.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
    operations: Arc<AtomicU64>,
    sweep_interval: u64,
}

impl MemoryStore {
    /// Create a store expiring keys by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store expiring keys by `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            clock,
            operations: Arc::new(AtomicU64::new(0)),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sweep expired keys every `operations` store operations (at least 1)
    pub fn with_sweep_interval(mut self, operations: u64) -> Self {
        self.sweep_interval = operations.max(1);
        self
    }

    /// Number of keys holding unexpired state
    pub fn active_keys(&self) -> usize {
        let now = self.clock.now_secs();
        self.slots.iter().filter(|slot| slot.is_live(now)).count()
    }

    /// Whether `key` holds unexpired state
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_secs();
        self.slots.get(key).map_or(false, |slot| slot.is_live(now))
    }

    /// Drop expired keys, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            let live = slot.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Count one operation, sweeping when the interval is reached. Must not be
    /// called while a slot is locked.
    fn tick(&self) {
        let count = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.sweep_interval == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!("Memory store swept {} expired keys", removed);
            }
        }
    }

    /// Lock the slot for `key`, clearing it first if it has expired
    fn slot_mut(&self, key: &str, now: u64) -> RefMut<'_, String, Slot> {
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(Slot::default);
        if !slot.is_live(now) {
            *slot = Slot::default();
        }
        slot
    }

    fn apply(&self, unit: &AtomicUnit) -> Result<i64, StoreError> {
        let now = self.clock.now_secs();

        let allowed = match unit {
            AtomicUnit::FixedWindow {
                key,
                capacity,
                window_secs,
            } => {
                let mut slot = self.slot_mut(key, now);
                let current = match &slot.value {
                    None => None,
                    Some(StoredValue::Counter(count)) => Some(*count),
                    Some(_) => return Err(wrong_type(key)),
                };

                let step = fixed_window_step(current, *capacity);
                slot.value = Some(StoredValue::Counter(step.count));
                if step.opens_window {
                    slot.expires_at = Some(now + window_secs);
                }
                step.allowed
            }
            AtomicUnit::SlidingWindow {
                key,
                capacity,
                window_secs,
                now: score,
                member,
            } => {
                let mut slot = self.slot_mut(key, now);
                if slot.value.is_none() {
                    slot.value = Some(StoredValue::Log(WindowLog::default()));
                }

                let allowed = match slot.value.as_mut() {
                    Some(StoredValue::Log(log)) => {
                        log.record(*capacity, *window_secs, *score, member.clone())
                    }
                    _ => return Err(wrong_type(key)),
                };
                if allowed {
                    slot.expires_at = Some(now + window_secs + 1);
                }
                allowed
            }
            AtomicUnit::TokenBucket {
                key,
                capacity,
                rate,
                now: at,
                ttl_secs,
            } => {
                let mut slot = self.slot_mut(key, now);
                let state = match &slot.value {
                    None => None,
                    Some(StoredValue::Bucket(state)) => Some(*state),
                    Some(_) => return Err(wrong_type(key)),
                };

                let step = token_bucket_step(state, *capacity, *rate, *at);
                slot.value = Some(StoredValue::Bucket(step.state));
                if step.first_use {
                    slot.expires_at = Some(now + ttl_secs);
                }
                step.allowed
            }
        };

        Ok(if allowed { ALLOW } else { DENY })
    }

    fn run(&self, command: &Command, now: u64) -> Result<Option<i64>, StoreError> {
        match command {
            Command::Get(key) => match self.slots.get(key.as_str()) {
                Some(slot) if slot.is_live(now) => match &slot.value {
                    Some(StoredValue::Counter(count)) => Ok(Some(*count)),
                    _ => Err(wrong_type(key)),
                },
                _ => Ok(None),
            },
            Command::Ttl(key) => match self.slots.get(key.as_str()) {
                Some(slot) if slot.is_live(now) => Ok(Some(
                    slot.expires_at.map_or(-1, |at| (at - now) as i64),
                )),
                _ => Ok(Some(-2)),
            },
            Command::Incr(key) => {
                let mut slot = self.slot_mut(key, now);
                let count = match &slot.value {
                    None => 1,
                    Some(StoredValue::Counter(count)) => count + 1,
                    Some(_) => return Err(wrong_type(key)),
                };
                slot.value = Some(StoredValue::Counter(count));
                Ok(Some(count))
            }
            Command::Expire(key, secs) => match self.slots.get_mut(key.as_str()) {
                Some(mut slot) if slot.is_live(now) => {
                    slot.expires_at = Some(now + secs);
                    Ok(Some(1))
                }
                _ => Ok(Some(0)),
            },
            Command::Del(key) => {
                let removed = self
                    .slots
                    .remove_if(key.as_str(), |_, slot| slot.is_live(now))
                    .is_some();
                Ok(Some(removed as i64))
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::UnexpectedReply(format!(
        "WRONGTYPE key {} holds a different kind of value",
        key
    ))
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn evaluate(&self, unit: &AtomicUnit) -> Result<i64, StoreError> {
        tokio::task::yield_now().await;
        let reply = self.apply(unit);
        self.tick();
        let reply = reply?;
        debug!(
            "Memory store {} for key {} returned {}",
            unit.algorithm(),
            unit.key(),
            reply
        );
        Ok(reply)
    }

    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Option<i64>>, StoreError> {
        tokio::task::yield_now().await;
        let now = self.clock.now_secs();
        let replies: Result<Vec<Option<i64>>, StoreError> =
            commands.iter().map(|command| self.run(command, now)).collect();
        self.tick();
        replies
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.slots.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;

    fn store_at(start: u64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(start);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn fixed(key: &str, capacity: u64, window_secs: u64) -> AtomicUnit {
        AtomicUnit::FixedWindow {
            key: key.to_string(),
            capacity,
            window_secs,
        }
    }

    #[tokio::test]
    async fn test_fixed_window_denies_over_capacity() {
        let (store, _clock) = store_at(1000);

        for _ in 0..3 {
            assert_eq!(store.evaluate(&fixed("k", 3, 10)).await.unwrap(), ALLOW);
        }
        assert_eq!(store.evaluate(&fixed("k", 3, 10)).await.unwrap(), DENY);
        assert_eq!(store.evaluate(&fixed("other", 3, 10)).await.unwrap(), ALLOW);
        assert_eq!(store.active_keys(), 2);
    }

    #[tokio::test]
    async fn test_fixed_window_expiry_set_by_first_increment_only() {
        let (store, clock) = store_at(1000);

        store.evaluate(&fixed("k", 5, 10)).await.unwrap();
        clock.advance(6);
        store.evaluate(&fixed("k", 5, 10)).await.unwrap();

        let ttl = store.pipeline(&[Command::Ttl("k".to_string())]).await.unwrap();
        assert_eq!(ttl, vec![Some(4)]);

        clock.advance(4);
        assert!(!store.contains_key("k"));
    }

    #[tokio::test]
    async fn test_fixed_window_boundary_burst() {
        let (store, clock) = store_at(1000);
        let capacity = 3;

        // Window N opens at 1000 and closes at 1010
        store.evaluate(&fixed("k", capacity, 10)).await.unwrap();
        clock.set(1009);
        for _ in 0..capacity - 1 {
            assert_eq!(store.evaluate(&fixed("k", capacity, 10)).await.unwrap(), ALLOW);
        }

        // Window N+1: a full quota again straight away
        clock.set(1010);
        for _ in 0..capacity {
            assert_eq!(store.evaluate(&fixed("k", capacity, 10)).await.unwrap(), ALLOW);
        }
        assert_eq!(store.evaluate(&fixed("k", capacity, 10)).await.unwrap(), DENY);
    }

    #[tokio::test]
    async fn test_sliding_window_expiry_follows_latest_entry() {
        let (store, clock) = store_at(1000);
        let unit = |now: u64, member: &str| AtomicUnit::SlidingWindow {
            key: "k".to_string(),
            capacity: 2,
            window_secs: 10,
            now,
            member: member.to_string(),
        };

        assert_eq!(store.evaluate(&unit(1000, "a")).await.unwrap(), ALLOW);
        clock.set(1009);
        assert_eq!(store.evaluate(&unit(1009, "b")).await.unwrap(), ALLOW);

        // "b" is still inside the lookback at 1011, so the key must survive
        clock.set(1011);
        assert!(store.contains_key("k"));
        assert_eq!(store.evaluate(&unit(1011, "c")).await.unwrap(), ALLOW);
        assert_eq!(store.evaluate(&unit(1011, "d")).await.unwrap(), DENY);
    }

    #[tokio::test]
    async fn test_token_bucket_expiry_set_on_first_use() {
        let (store, clock) = store_at(1000);
        let unit = |now: u64| AtomicUnit::TokenBucket {
            key: "tb".to_string(),
            capacity: 1,
            rate: 1.0,
            now,
            ttl_secs: 100,
        };

        assert_eq!(store.evaluate(&unit(1000)).await.unwrap(), ALLOW);
        clock.set(1050);
        assert_eq!(store.evaluate(&unit(1050)).await.unwrap(), ALLOW);

        // The idle expiry is not pushed back by later checks
        let ttl = store.pipeline(&[Command::Ttl("tb".to_string())]).await.unwrap();
        assert_eq!(ttl, vec![Some(50)]);

        clock.set(1100);
        assert!(!store.contains_key("tb"));
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (store, _clock) = store_at(1000);
        store.evaluate(&fixed("k", 3, 10)).await.unwrap();

        let unit = AtomicUnit::TokenBucket {
            key: "k".to_string(),
            capacity: 1,
            rate: 1.0,
            now: 1000,
            ttl_secs: 100,
        };
        assert!(matches!(
            store.evaluate(&unit).await,
            Err(StoreError::UnexpectedReply(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_commands() {
        let (store, clock) = store_at(1000);
        let key = "p".to_string();

        let replies = store
            .pipeline(&[
                Command::Get(key.clone()),
                Command::Ttl(key.clone()),
                Command::Incr(key.clone()),
                Command::Ttl(key.clone()),
                Command::Expire(key.clone(), 5),
                Command::Incr(key.clone()),
                Command::Get(key.clone()),
            ])
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![None, Some(-2), Some(1), Some(-1), Some(1), Some(2), Some(2)]
        );

        clock.advance(5);
        let replies = store
            .pipeline(&[
                Command::Get(key.clone()),
                Command::Expire(key.clone(), 5),
                Command::Del(key.clone()),
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![None, Some(0), Some(0)]);
    }

    #[tokio::test]
    async fn test_expired_keys_swept_without_being_touched() {
        let (store, clock) = store_at(1000);
        let store = store.with_sweep_interval(8);

        for i in 0..6 {
            store.evaluate(&fixed(&format!("burst:{}", i), 1, 10)).await.unwrap();
        }
        assert_eq!(store.slots.len(), 6);

        // Two more operations on an unrelated key reach the interval
        clock.advance(10);
        store.evaluate(&fixed("steady", 5, 60)).await.unwrap();
        assert_eq!(store.slots.len(), 7);
        store.evaluate(&fixed("steady", 5, 60)).await.unwrap();

        assert_eq!(store.slots.len(), 1);
        assert!(store.contains_key("steady"));
    }

    #[tokio::test]
    async fn test_delete_clears_state() {
        let (store, _clock) = store_at(1000);
        store.evaluate(&fixed("k", 1, 10)).await.unwrap();
        assert_eq!(store.evaluate(&fixed("k", 1, 10)).await.unwrap(), DENY);

        store.delete("k").await.unwrap();
        assert!(!store.contains_key("k"));
        assert_eq!(store.evaluate(&fixed("k", 1, 10)).await.unwrap(), ALLOW);
    }
}
