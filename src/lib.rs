//! Distributed rate-limiting core.
//!
//! `skp_ratelimit` answers one question per call: given a key and a
//! requested number of permits, may this call proceed right now? It answers
//! the same way whether one instance or fifty ask simultaneously, by
//! coordinating through a shared storage adapter, optionally backed by a
//! per-process local decision cache that short-circuits known-saturated
//! keys.
//!
//! Two algorithms are provided, both conforming to the same
//! [`RateLimiter`] contract:
//!
//! - [`SlidingWindowLimiter`]: approximates a true sliding window over two
//!   adjacent fixed buckets and a linear weight. Accurate to within a
//!   documented boundary error under cross-instance contention.
//! - [`TokenBucketLimiter`]: a classical token bucket, mutated through a
//!   single atomic server-side script per decision. Exact, at the cost of
//!   not supporting a local cache.
//!
//! The HTTP surface that turns a verdict into a status code, configuration
//! *loading*, dependency wiring, and metrics *export* are all collaborator
//! concerns outside this crate; see the top-level `DESIGN.md` for the
//! scoping rationale.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use skp_ratelimit::{LimiterConfig, RateLimiter, SlidingWindowLimiter, MemoryStorageAdapter};
//!
//! # async fn run() -> skp_ratelimit::Result<()> {
//! let storage = Arc::new(MemoryStorageAdapter::new());
//! let config = LimiterConfig::builder(100, Duration::from_secs(60)).build()?;
//! let limiter = SlidingWindowLimiter::new(storage, config);
//!
//! if limiter.try_acquire("user:123").await? {
//!     // proceed
//! } else {
//!     // caller applies fail-open/fail-closed policy; this crate only
//!     // reports the verdict
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `memory` (default): in-memory [`MemoryStorageAdapter`] for tests,
//!   benchmarks, and single-instance deployments.
//! - `redis`: [`RedisStorageAdapter`], backed by `deadpool_redis`.

pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod sliding_window;
pub mod storage;
pub mod token_bucket;

pub use cache::DecisionCache;
pub use config::{LimiterConfig, LimiterConfigBuilder, PoolConfig};
pub use error::{ConfigError, RateLimitError, Result, StorageError};
pub use limiter::RateLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use storage::{ScriptOutcome, StorageAdapter};
pub use token_bucket::TokenBucketLimiter;

#[cfg(feature = "memory")]
pub use storage::MemoryStorageAdapter;
#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorageAdapter};

/// Convenience re-exports for the common case: one storage adapter, one
/// limiter, the public contract.
pub mod prelude {
    pub use crate::config::LimiterConfig;
    pub use crate::error::{RateLimitError, Result};
    pub use crate::limiter::RateLimiter;
    pub use crate::sliding_window::SlidingWindowLimiter;
    pub use crate::storage::StorageAdapter;
    pub use crate::token_bucket::TokenBucketLimiter;

    #[cfg(feature = "memory")]
    pub use crate::storage::MemoryStorageAdapter;
    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStorageAdapter};
}
