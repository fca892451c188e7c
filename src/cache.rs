//! Local decision cache: an in-process, size-bounded, TTL-bounded mapping
//! from key to last observed usage count, used to short-circuit known-
//! saturated keys before a storage round trip.
//!
//! The cache is advisory only — it is never the source of truth — and
//! provides no cross-instance coherence. Built on `moka`, whose
//! Window-TinyLFU-class eviction policy satisfies the "at least
//! LRU-quality" admission/eviction requirement.

use std::time::Duration;

use moka::future::Cache;

/// Bounded capacity applied when a caller does not override it, matching
/// the sliding-window bucket's documented example cap.
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Per-process local decision cache.
///
/// Entries expire `local_cache_ttl` wall time after insertion (`moka`'s
/// `time_to_live`, not `time_to_idle` — a read must not refresh the TTL,
/// per the "from insertion, not from last read" requirement).
pub struct LocalDecisionCache {
    cache: Cache<String, u64>,
}

impl std::fmt::Debug for LocalDecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDecisionCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl LocalDecisionCache {
    /// Build a cache with the given TTL and the default 10,000-entry cap.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_ENTRIES)
    }

    /// Build a cache with an explicit entry cap.
    pub fn with_capacity(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Return the last observed count for `key`, if the entry is still
    /// fresh.
    pub async fn probe(&self, key: &str) -> Option<u64> {
        self.cache.get(key).await
    }

    /// Record a new observation, overwriting any prior entry and resetting
    /// its TTL.
    pub async fn update(&self, key: &str, count: u64) {
        self.cache.insert(key.to_string(), count).await;
    }

    /// Remove the entry for `key`, if any.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Number of entries currently held (best-effort; `moka` applies
    /// eviction/expiry lazily).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// A cache that never caches anything: every probe misses. Used when
/// `local_cache_enabled` is false so the limiter code path does not need a
/// separate branch for "no cache".
#[derive(Debug, Default)]
pub struct NoOpDecisionCache;

impl NoOpDecisionCache {
    /// Always reports a miss.
    pub async fn probe(&self, _key: &str) -> Option<u64> {
        None
    }

    /// No-op.
    pub async fn update(&self, _key: &str, _count: u64) {}

    /// No-op.
    pub async fn invalidate(&self, _key: &str) {}
}

/// Either a live [`LocalDecisionCache`] or the [`NoOpDecisionCache`],
/// selected once at construction from `LimiterConfig::local_cache_enabled`.
/// A closed sum rather than dynamic dispatch, matching this crate's
/// preference for enum-based variant selection over trait objects.
#[derive(Debug)]
pub enum DecisionCache {
    /// Caching enabled.
    Enabled(LocalDecisionCache),
    /// Caching disabled; every probe misses.
    Disabled(NoOpDecisionCache),
}

impl DecisionCache {
    /// Construct the enabled or disabled variant per configuration.
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        if enabled {
            Self::Enabled(LocalDecisionCache::new(ttl))
        } else {
            Self::Disabled(NoOpDecisionCache)
        }
    }

    /// See [`LocalDecisionCache::probe`].
    pub async fn probe(&self, key: &str) -> Option<u64> {
        match self {
            Self::Enabled(cache) => cache.probe(key).await,
            Self::Disabled(cache) => cache.probe(key).await,
        }
    }

    /// See [`LocalDecisionCache::update`].
    pub async fn update(&self, key: &str, count: u64) {
        match self {
            Self::Enabled(cache) => cache.update(key, count).await,
            Self::Disabled(cache) => cache.update(key, count).await,
        }
    }

    /// See [`LocalDecisionCache::invalidate`].
    pub async fn invalidate(&self, key: &str) {
        match self {
            Self::Enabled(cache) => cache.invalidate(key).await,
            Self::Disabled(cache) => cache.invalidate(key).await,
        }
    }
}
