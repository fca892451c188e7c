//! Shared storage adapter: a thin, retryable abstraction over a remote
//! key/value store offering the atomic primitives both limiters need.
//!
//! The adapter deliberately exposes only the primitives below; it does not
//! reason about rate-limit semantics. This keeps the store swappable and
//! lets the limiters be unit-tested against [`memory::MemoryStorageAdapter`].

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::MemoryStorageAdapter;
#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStorageAdapter};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// A single field/value pair of a hash-shaped key, as used by the
/// token-bucket `tokens`/`last_refill` state.
pub type HashFields = Vec<(String, String)>;

/// Outcome of invoking the token-bucket atomic script: `allowed` and the
/// token count left in the bucket after the call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptOutcome {
    /// Whether the request was granted.
    pub allowed: bool,
    /// Tokens remaining in the bucket immediately after the call.
    pub tokens_after: f64,
}

/// Thin, retryable abstraction over a remote key/value store.
///
/// All operations target a single logical store; partitioning is delegated
/// to the store. Implementations must be thread-safe (`Send + Sync`).
pub trait StorageAdapter: Send + Sync + 'static {
    /// Atomically increment the integer counter at `key` by 1 and (re-)apply
    /// `ttl`. Returns the count after incrementing. Creates the key at 1 if
    /// absent.
    fn incr_and_expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<u64>> + Send;

    /// Read the integer counter at `key`. Returns 0 if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Overwrite the integer counter at `key` and (re-)apply `ttl`.
    fn set(&self, key: &str, value: u64, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Compare-and-set: if the current value equals `expect`, replace it
    /// with `update`. Returns whether the swap happened. Must detect
    /// concurrent writes between the read and the write.
    fn compare_and_set(
        &self,
        key: &str,
        expect: u64,
        update: u64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Remove `key`. Succeeds even if the key did not exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Execute a server-side atomic script against one key, passing
    /// `args` as its argument list (the token-bucket script contract:
    /// `[capacity, refill_rate_per_ms, requested, now_ms, ttl_ms]`).
    fn eval_script(
        &self,
        key: &str,
        args: &[String],
    ) -> impl Future<Output = Result<ScriptOutcome>> + Send;

    /// Read the `tokens` field of the token-bucket hash at `key`, with no
    /// refill applied. Returns `0.0` if `key` has never been decisioned.
    ///
    /// This is distinct from [`get`](StorageAdapter::get): `eval_script`
    /// stores token-bucket state as a hash (`tokens`, `last_refill`), not
    /// the bare integer counter `get`/`set`/`incr_and_expire` operate on,
    /// so reading it through `get` either returns an unrelated field
    /// (in-process backend) or raises `WRONGTYPE` (Redis).
    fn get_token_bucket_tokens(&self, key: &str) -> impl Future<Output = Result<f64>> + Send;

    /// Liveness probe.
    fn available(&self) -> impl Future<Output = Result<bool>> + Send;
}

impl<S: StorageAdapter + ?Sized> StorageAdapter for std::sync::Arc<S> {
    async fn incr_and_expire(&self, key: &str, ttl: Duration) -> Result<u64> {
        (**self).incr_and_expire(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn compare_and_set(&self, key: &str, expect: u64, update: u64) -> Result<bool> {
        (**self).compare_and_set(key, expect, update).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn eval_script(&self, key: &str, args: &[String]) -> Result<ScriptOutcome> {
        (**self).eval_script(key, args).await
    }

    async fn get_token_bucket_tokens(&self, key: &str) -> Result<f64> {
        (**self).get_token_bucket_tokens(key).await
    }

    async fn available(&self) -> Result<bool> {
        (**self).available().await
    }
}

impl<S: StorageAdapter + ?Sized> StorageAdapter for Box<S> {
    async fn incr_and_expire(&self, key: &str, ttl: Duration) -> Result<u64> {
        (**self).incr_and_expire(key, ttl).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn compare_and_set(&self, key: &str, expect: u64, update: u64) -> Result<bool> {
        (**self).compare_and_set(key, expect, update).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn eval_script(&self, key: &str, args: &[String]) -> Result<ScriptOutcome> {
        (**self).eval_script(key, args).await
    }

    async fn get_token_bucket_tokens(&self, key: &str) -> Result<f64> {
        (**self).get_token_bucket_tokens(key).await
    }

    async fn available(&self) -> Result<bool> {
        (**self).available().await
    }
}

/// Current timestamp in milliseconds since the Unix epoch (UTC wall clock).
///
/// Sliding-window and token-bucket math both require this exact clock —
/// never a monotonic clock — so that window boundaries agree across
/// instances.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// Retry an async storage operation up to 3 attempts total, with linear
/// backoff of `10ms * attempt` between attempts. The third failure is
/// returned as-is. Does not sleep after the final attempt.
pub(crate) async fn with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(_) if attempt < MAX_ATTEMPTS => {
                tracing::debug!(attempt, "storage operation failed, retrying");
                tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
