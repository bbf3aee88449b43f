//! Rate limiting module
//!
//! This module decides allow or deny for a request against a quota held in a
//! shared store, so that every process talking to the same store enforces one
//! limit. Three algorithms are available, each evaluated as a single atomic
//! unit on the store:
//!
//! - **Fixed Window**: Counter reset when the window expires
//! - **Sliding Window**: Log of admitted requests over a trailing window
//! - **Token Bucket**: Continuously refilled permits, bursts up to capacity
//!
//! A best-effort pipelined fixed window is also provided. It is not atomic
//! and may admit more than the configured capacity under concurrency.
//!
//! # Example
//!
//! ```rust,no_run
//! use ratekeeper::config::{FailurePolicy, LimiterSettings};
//! use ratekeeper::rate_limit::{Algorithm, LimitOptions, RateLimiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = LimiterSettings::new(FailurePolicy::FailClosed);
//!     let limiter = RateLimiter::connect(settings).await.unwrap();
//!
//!     // 100 requests per minute for one caller
//!     limiter.limit_user("42", 100, 60).await.unwrap();
//!
//!     // Or any combination of options
//!     let options = LimitOptions::new()
//!         .route("/orders")
//!         .capacity(20)
//!         .rate(2.0)
//!         .algorithm(Algorithm::TokenBucket);
//!     if let Err(e) = limiter.check(options).await {
//!         eprintln!("rejected: {}", e);
//!     }
//! }
//! ```

pub mod algorithm;
pub mod clock;
pub mod local;
pub mod lua_scripts;
pub mod options;
pub mod pipelined;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::MemoryStore;
pub use options::{LimitOption, LimitOptions};
pub use redis::RedisStore;
pub use service::RateLimiter;
pub use store::QuotaStore;
pub use types::{Algorithm, LimiterConfig};
