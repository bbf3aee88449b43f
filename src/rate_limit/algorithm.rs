//! Algorithm strategies.
//!
//! Each algorithm is encoded as one [`AtomicUnit`]: everything the store needs
//! to run the whole check-and-update without interleaving from other callers.
//! [`RedisStore`](super::redis::RedisStore) runs a unit as a Lua script;
//! [`MemoryStore`](super::local::MemoryStore) runs the state transitions in this
//! module under a per-key lock. The two must stay in step.

use super::types::{Algorithm, LimiterConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Default lifetime of an idle token bucket, independent of its rate.
pub const DEFAULT_TOKEN_BUCKET_TTL_SECS: u64 = 86_400;

/// One indivisible check-and-update against a single key
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicUnit {
    FixedWindow {
        key: String,
        capacity: u64,
        window_secs: u64,
    },
    SlidingWindow {
        key: String,
        capacity: u64,
        window_secs: u64,
        now: u64,
        /// Unique set member so requests in the same second do not collide
        member: String,
    },
    TokenBucket {
        key: String,
        capacity: u64,
        rate: f64,
        now: u64,
        ttl_secs: u64,
    },
}

impl AtomicUnit {
    /// Build the unit for an atomic algorithm, or `None` for the pipelined one
    pub fn for_config(
        config: &LimiterConfig,
        now: u64,
        members: &MemberSource,
        token_bucket_ttl_secs: u64,
    ) -> Option<Self> {
        let key = config.key.clone();
        match config.algorithm {
            Algorithm::FixedWindow => Some(AtomicUnit::FixedWindow {
                key,
                capacity: config.capacity,
                window_secs: config.window_secs,
            }),
            Algorithm::SlidingWindow => Some(AtomicUnit::SlidingWindow {
                key,
                capacity: config.capacity,
                window_secs: config.window_secs,
                now,
                member: members.next(now),
            }),
            Algorithm::TokenBucket => Some(AtomicUnit::TokenBucket {
                key,
                capacity: config.capacity,
                rate: config.rate,
                now,
                ttl_secs: token_bucket_ttl_secs,
            }),
            Algorithm::PipelinedFixedWindow => None,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            AtomicUnit::FixedWindow { key, .. }
            | AtomicUnit::SlidingWindow { key, .. }
            | AtomicUnit::TokenBucket { key, .. } => key,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            AtomicUnit::FixedWindow { .. } => Algorithm::FixedWindow,
            AtomicUnit::SlidingWindow { .. } => Algorithm::SlidingWindow,
            AtomicUnit::TokenBucket { .. } => Algorithm::TokenBucket,
        }
    }
}

/// Primitive command sent in a pipelined batch.
///
/// Every reply is read as an optional integer: `GET` yields `None` for a
/// missing key, `TTL` yields -2 (missing) or -1 (no expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Ttl(String),
    Incr(String),
    Expire(String, u64),
    Del(String),
}

/// Source of unique sliding window members.
///
/// Members are `{now}-{instance}-{sequence}`: the instance id separates
/// processes, the sequence separates requests within this limiter.
#[derive(Debug)]
pub struct MemberSource {
    instance: Uuid,
    sequence: AtomicU64,
}

impl MemberSource {
    pub fn new() -> Self {
        Self {
            instance: Uuid::new_v4(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next(&self, now: u64) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", now, self.instance.simple(), seq)
    }
}

impl Default for MemberSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a fixed window increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowStep {
    pub count: i64,
    /// The increment created the counter, so the window expiry must be set
    pub opens_window: bool,
    pub allowed: bool,
}

/// Increment a fixed window counter and compare it to `capacity`.
pub fn fixed_window_step(current: Option<i64>, capacity: u64) -> FixedWindowStep {
    let count = current.unwrap_or(0) + 1;
    FixedWindowStep {
        count,
        opens_window: count == 1,
        allowed: count <= i64::try_from(capacity).unwrap_or(i64::MAX),
    }
}

/// Sliding window log: set member to score (Unix seconds)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowLog {
    entries: HashMap<String, u64>,
}

impl WindowLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count entries with score in `[start, end]`
    pub fn count_between(&self, start: u64, end: u64) -> u64 {
        self.entries
            .values()
            .filter(|score| **score >= start && **score <= end)
            .count() as u64
    }

    /// Admit `member` at `now` unless the lookback already holds `capacity`
    /// entries. Entries older than the window are pruned on admission.
    pub fn record(&mut self, capacity: u64, window_secs: u64, now: u64, member: String) -> bool {
        let window_start = now.saturating_sub(window_secs);
        if self.count_between(window_start, now) >= capacity {
            return false;
        }

        self.entries.insert(member, now);
        self.entries.retain(|_, score| *score >= window_start);
        true
    }
}

/// Token bucket state as persisted in the store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub last_refill: u64,
    pub permits: f64,
}

/// Outcome of a token bucket check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStep {
    pub state: BucketState,
    pub allowed: bool,
    /// No prior state existed; the long idle expiry must be set
    pub first_use: bool,
}

/// Refill the bucket up to `capacity` and try to take one permit.
///
/// A fresh bucket starts full. Refill is clamped at `capacity`, and the
/// refilled state is persisted on deny as well so fractional refill is kept.
pub fn token_bucket_step(
    state: Option<BucketState>,
    capacity: u64,
    rate: f64,
    now: u64,
) -> BucketStep {
    let first_use = state.is_none();
    let mut state = state.unwrap_or(BucketState {
        last_refill: now,
        permits: capacity as f64,
    });

    let elapsed = now.saturating_sub(state.last_refill) as f64;
    state.permits = (state.permits + elapsed * rate).min(capacity as f64);
    state.last_refill = state.last_refill.max(now);

    let allowed = state.permits >= 1.0;
    if allowed {
        state.permits -= 1.0;
    }

    BucketStep {
        state,
        allowed,
        first_use,
    }
}
