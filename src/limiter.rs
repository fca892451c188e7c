//! Public limiter contract shared by the sliding-window and token-bucket
//! implementations.
//!
//! Both limiters are constructed explicitly from a storage adapter, a
//! [`LimiterConfig`](crate::config::LimiterConfig), and (implicitly) the
//! process-wide `metrics` recorder — there is no dependency-injection
//! container and no process-global mutable state beyond the storage
//! adapter's own connection pool.

use std::future::Future;

use crate::error::Result;

/// The decision contract every rate limiter in this crate implements.
///
/// All four operations are safe to call from any thread/task and never
/// block beyond a bounded storage round trip (plus the adapter's retry
/// policy).
pub trait RateLimiter {
    /// Attempt to acquire a single permit for `key`. Equivalent to
    /// `try_acquire(key, 1)`.
    fn try_acquire(&self, key: &str) -> impl Future<Output = Result<bool>> + Send
    where
        Self: Sync,
    {
        async move { self.try_acquire_n(key, 1).await }
    }

    /// Attempt to acquire `permits` for `key`. `permits` must be `>= 1`;
    /// `permits <= 0` is rejected with `InvalidArgument` by implementations
    /// (the trait takes `i64` so callers can pass a negative value and get
    /// the documented error rather than a panic from an unsigned cast).
    fn try_acquire_n(&self, key: &str, permits: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Best-effort read of remaining permits for `key`. Returns `-1` when
    /// the limiter cannot answer with confidence (reserved for future
    /// backends; both limiters in this crate always return `>= 0`).
    fn available_permits(&self, key: &str) -> impl Future<Output = Result<i64>> + Send;

    /// Delete all stored state for `key` and drop any local cache entry.
    fn reset(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}
