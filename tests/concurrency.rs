//! Scenario E — concurrent contention on a single instance: many tasks
//! racing `try_acquire` on the same key must stay within the documented
//! boundary allowance (spec §8, invariant 1: `<= max_permits * 1.05`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skp_ratelimit::{LimiterConfig, MemoryStorageAdapter, RateLimiter, SlidingWindowLimiter};

#[tokio::test]
async fn ten_tasks_fifty_calls_each_stays_within_boundary_allowance() {
    let storage = Arc::new(MemoryStorageAdapter::new());
    let config = LimiterConfig::builder(100, Duration::from_secs(1))
        .local_cache_enabled(false)
        .build()
        .unwrap();
    let limiter = Arc::new(SlidingWindowLimiter::new(storage, config));

    let allowed = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let limiter = Arc::clone(&limiter);
        let allowed = Arc::clone(&allowed);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                if limiter.try_acquire("contended-key").await.unwrap() {
                    allowed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total = allowed.load(Ordering::SeqCst);
    // True sliding-log semantics would cap this at exactly 100; the
    // two-bucket linear approximation may overshoot, but only up to the
    // documented 5% boundary error (spec §8 property 1: exactly between
    // 100 and 105).
    assert!(total >= 100, "expected at least max_permits accepts, got {total}");
    assert!(
        total <= (100.0 * 1.05) as usize,
        "boundary overshoot too large: {total}"
    );
}

#[tokio::test]
async fn independent_keys_under_concurrency_do_not_cross_contaminate() {
    let storage = Arc::new(MemoryStorageAdapter::new());
    let config = LimiterConfig::builder(10, Duration::from_secs(1))
        .local_cache_enabled(false)
        .build()
        .unwrap();
    let limiter = Arc::new(SlidingWindowLimiter::new(storage, config));

    let mut tasks = Vec::new();
    for key in 0..5 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move {
            let key = format!("key-{key}");
            let mut accepted = 0;
            for _ in 0..20 {
                if limiter.try_acquire(&key).await.unwrap() {
                    accepted += 1;
                }
            }
            accepted
        }));
    }

    for task in tasks {
        let accepted = task.await.unwrap();
        assert!(accepted <= 11, "key exceeded its own ceiling: {accepted}");
    }
}
