//! Sliding-window limiter: approximates a true sliding window over two
//! adjacent fixed-width buckets and a linear weight, per spec §4.3.
//!
//! ```text
//! percent_in_curr = (now_ms mod W_ms) / W_ms
//! prev_weight     = 1 - percent_in_curr
//! estimated_count = prev_count * prev_weight + curr_count
//! ```
//!
//! `estimated_count` is compared against `max_permits`. The approximation
//! can briefly overshoot the ceiling under cross-instance contention; this
//! is the documented boundary error (spec §8, invariant 1), bounded at 5%.

use std::sync::Arc;

use crate::cache::DecisionCache;
use crate::config::LimiterConfig;
use crate::error::{RateLimitError, Result};
use crate::limiter::RateLimiter;
use crate::metrics;
use crate::storage::{current_timestamp_ms, StorageAdapter};

/// Sliding-window rate limiter over a [`StorageAdapter`].
///
/// Holds no mutable state of its own beyond the local decision cache; all
/// durable state lives in the storage adapter, keyed `rl:<user_key>:<bucket>`.
pub struct SlidingWindowLimiter<S> {
    storage: Arc<S>,
    config: LimiterConfig,
    cache: DecisionCache,
}

impl<S: StorageAdapter> std::fmt::Debug for SlidingWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("max_permits", &self.config.max_permits())
            .field("window", &self.config.window())
            .finish()
    }
}

impl<S: StorageAdapter> SlidingWindowLimiter<S> {
    /// Construct a limiter from a storage adapter and validated config.
    /// `refill_rate` in `config` is ignored.
    pub fn new(storage: Arc<S>, config: LimiterConfig) -> Self {
        let cache = DecisionCache::new(config.local_cache_enabled(), config.local_cache_ttl());
        Self {
            storage,
            config,
            cache,
        }
    }

    fn window_ms(&self) -> u64 {
        self.config.window().as_millis() as u64
    }

    fn window_start_ms(&self, now_ms: u64) -> u64 {
        let w = self.window_ms();
        (now_ms / w) * w
    }

    fn bucket_key(&self, key: &str, window_start_ms: u64) -> String {
        format!("rl:{key}:{window_start_ms}")
    }

    /// `(current_bucket_key, previous_bucket_key, prev_weight)` at `now_ms`.
    fn bucket_keys(&self, key: &str, now_ms: u64) -> (String, String, f64) {
        let w = self.window_ms();
        let curr_start = self.window_start_ms(now_ms);
        let prev_start = curr_start.saturating_sub(w);
        let percent_in_curr = (now_ms % w) as f64 / w as f64;
        let prev_weight = 1.0 - percent_in_curr;
        (
            self.bucket_key(key, curr_start),
            self.bucket_key(key, prev_start),
            prev_weight,
        )
    }

    async fn estimated_count(&self, key: &str, now_ms: u64) -> Result<(String, String, f64)> {
        let (curr_key, prev_key, prev_weight) = self.bucket_keys(key, now_ms);
        let curr_count = self.storage.get(&curr_key).await? as f64;
        let prev_count = self.storage.get(&prev_key).await? as f64;
        let estimate = prev_count * prev_weight + curr_count;
        Ok((curr_key, prev_key, estimate))
    }
}

impl<S: StorageAdapter> RateLimiter for SlidingWindowLimiter<S> {
    async fn try_acquire_n(&self, key: &str, permits: i64) -> Result<bool> {
        if permits <= 0 {
            return Err(RateLimitError::invalid_argument(
                "permits must be >= 1 for try_acquire_n",
            ));
        }
        let permits = permits as u64;
        let max_permits = self.config.max_permits();

        if self.config.local_cache_enabled() {
            if let Some(cached) = self.cache.probe(key).await {
                if cached >= max_permits {
                    metrics::record_cache_hit();
                    metrics::record_rejected();
                    tracing::debug!(key = %key, permits, algorithm = "sliding_window", verdict = false, path = "cache", "try_acquire");
                    return Ok(false);
                }
            }
        }

        let now_ms = current_timestamp_ms();
        let (curr_key, _prev_key, estimate) = self.estimated_count(key, now_ms).await?;

        if estimate + permits as f64 > max_permits as f64 {
            self.cache.update(key, estimate as u64).await;
            metrics::record_rejected();
            tracing::debug!(key = %key, permits, algorithm = "sliding_window", verdict = false, path = "storage", "try_acquire");
            return Ok(false);
        }

        let new_count = self
            .storage
            .incr_and_expire(&curr_key, self.config.bucket_ttl())
            .await?;
        self.cache.update(key, new_count).await;

        let allowed = new_count <= max_permits;
        if allowed {
            metrics::record_allowed();
        } else {
            metrics::record_rejected();
        }
        tracing::debug!(key = %key, permits, algorithm = "sliding_window", verdict = allowed, path = "storage", "try_acquire");
        Ok(allowed)
    }

    async fn available_permits(&self, key: &str) -> Result<i64> {
        let now_ms = current_timestamp_ms();
        let (_curr_key, _prev_key, estimate) = self.estimated_count(key, now_ms).await?;
        let max_permits = self.config.max_permits() as f64;
        Ok((max_permits - estimate).max(0.0) as i64)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let now_ms = current_timestamp_ms();
        let (curr_key, prev_key, _) = self.bucket_keys(key, now_ms);
        self.storage.delete(&curr_key).await?;
        self.storage.delete(&prev_key).await?;
        self.cache.invalidate(key).await;
        Ok(())
    }
}
