//! In-process storage adapter backed by `DashMap`.
//!
//! Intended for tests, benchmarks, and single-instance deployments. There is
//! nothing distributed about it; it exists to let the limiters (and callers)
//! exercise the full [`StorageAdapter`] contract without a real store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::storage::{current_timestamp_ms, HashFields, ScriptOutcome, StorageAdapter};

struct Entry {
    /// Integer counter value, for `incr_and_expire`/`get`/`set`/`compare_and_set`.
    counter: u64,
    /// Hash fields, for `eval_script`'s token-bucket state.
    hash: HashFields,
    expires_at: u64,
}

impl Entry {
    fn counter(value: u64, expires_at: u64) -> Self {
        Self {
            counter: value,
            hash: Vec::new(),
            expires_at,
        }
    }
}

/// Request-count-driven garbage collection, ported from the donor's
/// `GcInterval::Requests` strategy: every Nth call sweeps expired keys
/// under a non-blocking lock so GC never adds latency to the hot path.
const GC_EVERY_N_REQUESTS: u64 = 10_000;

/// `DashMap`-backed [`StorageAdapter`].
pub struct MemoryStorageAdapter {
    data: DashMap<String, Entry>,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryStorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorageAdapter")
            .field("entries", &self.data.len())
            .finish()
    }
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
        }
    }

    /// Number of keys currently stored, including not-yet-collected expired
    /// ones.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the adapter holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn maybe_run_gc(&self) {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % GC_EVERY_N_REQUESTS == 0 {
            if let Some(_guard) = self.gc_lock.try_lock() {
                let now = current_timestamp_ms();
                self.data.retain(|_, entry| entry.expires_at > now);
            }
        }
    }

    fn live(&self, key: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Entry>> {
        let now = current_timestamp_ms();
        match self.data.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry),
            Some(_) => {
                self.data.remove(key);
                None
            }
            None => None,
        }
    }
}

impl StorageAdapter for MemoryStorageAdapter {
    async fn incr_and_expire(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.maybe_run_gc();
        let expires_at = current_timestamp_ms() + ttl.as_millis() as u64;

        let new_count = self
            .data
            .entry(key.to_string())
            .and_modify(|entry| {
                entry.counter += 1;
                entry.expires_at = expires_at;
            })
            .or_insert_with(|| Entry::counter(1, expires_at))
            .counter;

        Ok(new_count)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        self.maybe_run_gc();
        Ok(self.live(key).map(|e| e.counter).unwrap_or(0))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.maybe_run_gc();
        let expires_at = current_timestamp_ms() + ttl.as_millis() as u64;
        self.data
            .insert(key.to_string(), Entry::counter(value, expires_at));
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expect: u64, update: u64) -> Result<bool> {
        self.maybe_run_gc();
        let now = current_timestamp_ms();
        let current = self.live(key).map(|e| e.counter).unwrap_or(0);
        if current != expect {
            return Ok(false);
        }
        // Keep whatever TTL the entry already had; a fresh key with no
        // prior TTL is given a generous default since CAS alone does not
        // carry a ttl argument in the spec's signature.
        let expires_at = self
            .data
            .get(key)
            .map(|e| e.expires_at)
            .unwrap_or(now + Duration::from_secs(3600).as_millis() as u64);
        self.data
            .insert(key.to_string(), Entry::counter(update, expires_at));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn eval_script(&self, key: &str, args: &[String]) -> Result<ScriptOutcome> {
        self.maybe_run_gc();

        if args.len() != 5 {
            return Err(StorageError::ScriptError(format!(
                "expected 5 args (capacity, refill_rate_per_ms, requested, now_ms, ttl_ms), got {}",
                args.len()
            ))
            .into());
        }
        let capacity: f64 = args[0]
            .parse()
            .map_err(|_| StorageError::ScriptError("invalid capacity".into()))?;
        let refill_rate_per_ms: f64 = args[1]
            .parse()
            .map_err(|_| StorageError::ScriptError("invalid refill_rate_per_ms".into()))?;
        let requested: f64 = args[2]
            .parse()
            .map_err(|_| StorageError::ScriptError("invalid requested".into()))?;
        let now_ms: f64 = args[3]
            .parse()
            .map_err(|_| StorageError::ScriptError("invalid now_ms".into()))?;
        let ttl_ms: u64 = args[4]
            .parse()
            .map_err(|_| StorageError::ScriptError("invalid ttl_ms".into()))?;

        let expires_at = current_timestamp_ms() + ttl_ms;

        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            counter: 0,
            hash: vec![
                ("tokens".to_string(), capacity.to_string()),
                ("last_refill".to_string(), now_ms.to_string()),
            ],
            expires_at,
        });

        let tokens_field = entry
            .hash
            .iter()
            .position(|(k, _)| k == "tokens")
            .map(|i| entry.hash[i].1.clone())
            .unwrap_or_else(|| capacity.to_string());
        let last_refill_field = entry
            .hash
            .iter()
            .position(|(k, _)| k == "last_refill")
            .map(|i| entry.hash[i].1.clone())
            .unwrap_or_else(|| now_ms.to_string());

        let stored_tokens: f64 = tokens_field
            .parse()
            .map_err(|_| StorageError::Serialization("corrupt tokens field".into()))?;
        let last_refill: f64 = last_refill_field
            .parse()
            .map_err(|_| StorageError::Serialization("corrupt last_refill field".into()))?;

        let elapsed = (now_ms - last_refill).max(0.0);
        let refilled = (stored_tokens + elapsed * refill_rate_per_ms).min(capacity);

        let (allowed, tokens_after, new_last_refill) = if refilled >= requested {
            (true, refilled - requested, now_ms)
        } else {
            (false, refilled, last_refill)
        };

        entry.hash = vec![
            ("tokens".to_string(), tokens_after.to_string()),
            ("last_refill".to_string(), new_last_refill.to_string()),
        ];
        entry.expires_at = expires_at;

        Ok(ScriptOutcome {
            allowed,
            tokens_after,
        })
    }

    async fn get_token_bucket_tokens(&self, key: &str) -> Result<f64> {
        self.maybe_run_gc();
        let tokens = self.live(key).and_then(|entry| {
            entry
                .hash
                .iter()
                .find(|(field, _)| field == "tokens")
                .map(|(_, value)| value.clone())
        });
        match tokens {
            Some(raw) => {
                let parsed: f64 = raw
                    .parse()
                    .map_err(|_| StorageError::Serialization("corrupt tokens field".into()))?;
                Ok(parsed)
            }
            None => Ok(0.0),
        }
    }

    async fn available(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_and_expire_counts_up() {
        let storage = MemoryStorageAdapter::new();
        assert_eq!(
            storage
                .incr_and_expire("k", Duration::from_secs(60))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .incr_and_expire("k", Duration::from_secs(60))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn get_returns_zero_for_absent_key() {
        let storage = MemoryStorageAdapter::new();
        assert_eq!(storage.get("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let storage = MemoryStorageAdapter::new();
        storage.set("k", 42, Duration::from_secs(60)).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let storage = MemoryStorageAdapter::new();
        storage
            .set("k", 1, Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(storage.get("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compare_and_set_detects_races() {
        let storage = MemoryStorageAdapter::new();
        storage.set("k", 5, Duration::from_secs(60)).await.unwrap();

        assert!(!storage.compare_and_set("k", 4, 6).await.unwrap());
        assert!(storage.compare_and_set("k", 5, 6).await.unwrap());
        assert_eq!(storage.get("k").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let storage = MemoryStorageAdapter::new();
        storage.set("k", 1, Duration::from_secs(60)).await.unwrap();
        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn eval_script_seeds_full_bucket_on_first_call() {
        let storage = MemoryStorageAdapter::new();
        let args = vec![
            "10".to_string(),   // capacity
            "0.01".to_string(), // refill_rate_per_ms (10/s)
            "3".to_string(),    // requested
            "1000".to_string(), // now_ms
            "60000".to_string(),
        ];
        let outcome = storage.eval_script("tb:user", &args).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.tokens_after, 7.0);
    }

    #[tokio::test]
    async fn eval_script_denies_when_insufficient() {
        let storage = MemoryStorageAdapter::new();
        let full = vec![
            "5".to_string(),
            "0.0".to_string(),
            "5".to_string(),
            "0".to_string(),
            "60000".to_string(),
        ];
        storage.eval_script("tb:user", &full).await.unwrap();

        let deny = vec![
            "5".to_string(),
            "0.0".to_string(),
            "1".to_string(),
            "0".to_string(),
            "60000".to_string(),
        ];
        let outcome = storage.eval_script("tb:user", &deny).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.tokens_after, 0.0);
    }

    #[tokio::test]
    async fn available_is_always_true() {
        let storage = MemoryStorageAdapter::new();
        assert!(storage.available().await.unwrap());
    }

    #[tokio::test]
    async fn get_token_bucket_tokens_reads_hash_not_counter() {
        let storage = MemoryStorageAdapter::new();
        let args = vec![
            "10".to_string(),
            "0.0".to_string(),
            "4".to_string(),
            "0".to_string(),
            "60000".to_string(),
        ];
        storage.eval_script("tb:user", &args).await.unwrap();

        // The integer counter (used by incr_and_expire/get/set) is untouched
        // by eval_script; the hash-field read must not go through it.
        assert_eq!(storage.get("tb:user").await.unwrap(), 0);
        assert_eq!(
            storage.get_token_bucket_tokens("tb:user").await.unwrap(),
            6.0
        );
    }

    #[tokio::test]
    async fn get_token_bucket_tokens_is_zero_for_absent_key() {
        let storage = MemoryStorageAdapter::new();
        assert_eq!(
            storage.get_token_bucket_tokens("tb:missing").await.unwrap(),
            0.0
        );
    }
}
