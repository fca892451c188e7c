//! Scenario F — with the shared store unreachable, every `try_acquire`
//! raises `StorageError`; the local cache alone never satisfies a
//! decision.

use std::sync::Arc;
use std::time::Duration;

use skp_ratelimit::storage::{ScriptOutcome, StorageAdapter};
use skp_ratelimit::{LimiterConfig, RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};

/// A storage adapter that always fails, standing in for an unreachable
/// remote store.
#[derive(Default)]
struct UnreachableStorage;

impl StorageAdapter for UnreachableStorage {
    async fn incr_and_expire(&self, _key: &str, _ttl: Duration) -> skp_ratelimit::Result<u64> {
        Err(down())
    }

    async fn get(&self, _key: &str) -> skp_ratelimit::Result<u64> {
        Err(down())
    }

    async fn set(&self, _key: &str, _value: u64, _ttl: Duration) -> skp_ratelimit::Result<()> {
        Err(down())
    }

    async fn compare_and_set(&self, _key: &str, _expect: u64, _update: u64) -> skp_ratelimit::Result<bool> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> skp_ratelimit::Result<()> {
        Err(down())
    }

    async fn eval_script(&self, _key: &str, _args: &[String]) -> skp_ratelimit::Result<ScriptOutcome> {
        Err(down())
    }

    async fn get_token_bucket_tokens(&self, _key: &str) -> skp_ratelimit::Result<f64> {
        Err(down())
    }

    async fn available(&self) -> skp_ratelimit::Result<bool> {
        Ok(false)
    }
}

fn down() -> skp_ratelimit::RateLimitError {
    skp_ratelimit::StorageError::operation_failed("connection refused", true).into()
}

#[tokio::test]
async fn sliding_window_surfaces_storage_error_and_never_masks_via_cache() {
    let storage = Arc::new(UnreachableStorage);
    let config = LimiterConfig::builder(10, Duration::from_secs(1))
        .local_cache_enabled(true)
        .build()
        .unwrap();
    let limiter = SlidingWindowLimiter::new(storage, config);

    for _ in 0..3 {
        assert!(limiter.try_acquire("k").await.is_err());
    }
}

#[tokio::test]
async fn token_bucket_surfaces_storage_error() {
    let storage = Arc::new(UnreachableStorage);
    let config = LimiterConfig::builder(10, Duration::from_secs(1))
        .refill_rate(5.0)
        .build_for_token_bucket()
        .unwrap();
    let limiter = TokenBucketLimiter::new(storage, config);

    assert!(limiter.try_acquire("k").await.is_err());
}

#[tokio::test]
async fn availability_probe_reports_outage() {
    let storage = UnreachableStorage;
    assert!(!storage.available().await.unwrap());
}
