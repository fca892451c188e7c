//! Limiter configuration.
//!
//! A [`LimiterConfig`] is validated once at construction time and held for
//! the lifetime of the limiter instance. There is no mutation after
//! `build()`; if an operator wants different limits, they build a new
//! limiter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Connection pool sizing, shared by every storage adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    pub max_size: usize,
    /// Maximum number of idle connections kept warm.
    pub max_idle: usize,
    /// Minimum number of idle connections the pool tries to maintain.
    pub min_idle: usize,
    /// How long a caller waits for a connection before giving up.
    pub borrow_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 128,
            max_idle: 32,
            min_idle: 16,
            borrow_timeout: Duration::from_millis(2000),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.min_idle > self.max_idle || self.max_idle > self.max_size {
            return Err(ConfigError::InvalidStorage(
                "pool sizing must satisfy min_idle <= max_idle <= max_size".into(),
            )
            .into());
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidStorage("pool max_size must be > 0".into()).into());
        }
        Ok(())
    }
}

/// Validated, immutable configuration for a single limiter instance.
///
/// `refill_rate` is only consulted by the token-bucket limiter; the
/// sliding-window limiter ignores it entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    max_permits: u64,
    window: Duration,
    refill_rate: f64,
    local_cache_enabled: bool,
    local_cache_ttl: Duration,
    pool: PoolConfig,
}

impl LimiterConfig {
    /// Start building a configuration for the given ceiling and window.
    pub fn builder(max_permits: u64, window: Duration) -> LimiterConfigBuilder {
        LimiterConfigBuilder::new(max_permits, window)
    }

    /// Maximum permits: ceiling of the bucket or window.
    pub fn max_permits(&self) -> u64 {
        self.max_permits
    }

    /// The rate-limit horizon.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Permits per second refilled into a token bucket. Ignored by the
    /// sliding-window limiter.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Permits per millisecond, the unit the atomic script operates in.
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_rate / 1000.0
    }

    /// Whether the local decision cache is consulted.
    pub fn local_cache_enabled(&self) -> bool {
        self.local_cache_enabled
    }

    /// TTL applied to each local cache entry.
    pub fn local_cache_ttl(&self) -> Duration {
        self.local_cache_ttl
    }

    /// Connection pool sizing for the shared storage adapter.
    pub fn pool(&self) -> PoolConfig {
        self.pool
    }

    /// TTL applied to a sliding-window bucket key (`>= window`, re-applied
    /// on every increment).
    pub fn bucket_ttl(&self) -> Duration {
        self.window
    }

    /// TTL applied to a token-bucket hash key (`2 * window`).
    pub fn token_bucket_ttl(&self) -> Duration {
        self.window * 2
    }
}

/// Fallible builder for [`LimiterConfig`], mirroring the validate-on-build
/// pattern used throughout this crate's configuration types.
#[derive(Debug, Clone)]
pub struct LimiterConfigBuilder {
    max_permits: u64,
    window: Duration,
    refill_rate: f64,
    local_cache_enabled: bool,
    local_cache_ttl: Duration,
    pool: PoolConfig,
}

impl LimiterConfigBuilder {
    fn new(max_permits: u64, window: Duration) -> Self {
        Self {
            max_permits,
            window,
            refill_rate: 0.0,
            local_cache_enabled: true,
            local_cache_ttl: Duration::from_millis(100),
            pool: PoolConfig::default(),
        }
    }

    /// Set the refill rate in permits per second. Required (`> 0`) if this
    /// configuration will be used to build a token-bucket limiter.
    pub fn refill_rate(mut self, permits_per_sec: f64) -> Self {
        self.refill_rate = permits_per_sec;
        self
    }

    /// Enable or disable the local decision cache.
    pub fn local_cache_enabled(mut self, enabled: bool) -> Self {
        self.local_cache_enabled = enabled;
        self
    }

    /// Set the local decision cache TTL.
    pub fn local_cache_ttl(mut self, ttl: Duration) -> Self {
        self.local_cache_ttl = ttl;
        self
    }

    /// Override the connection pool sizing.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<LimiterConfig> {
        if self.max_permits == 0 {
            return Err(ConfigError::InvalidMaxPermits.into());
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidWindow.into());
        }
        if self.refill_rate < 0.0 {
            return Err(ConfigError::InvalidRefillRate.into());
        }
        if self.local_cache_enabled && self.local_cache_ttl.is_zero() {
            return Err(ConfigError::InvalidCacheTtl.into());
        }
        self.pool.validate()?;

        Ok(LimiterConfig {
            max_permits: self.max_permits,
            window: self.window,
            refill_rate: self.refill_rate,
            local_cache_enabled: self.local_cache_enabled,
            local_cache_ttl: self.local_cache_ttl,
            pool: self.pool,
        })
    }

    /// Validate and build a configuration intended for the token-bucket
    /// limiter, which additionally requires `refill_rate > 0`.
    pub fn build_for_token_bucket(self) -> Result<LimiterConfig> {
        if self.refill_rate <= 0.0 {
            return Err(ConfigError::InvalidRefillRate.into());
        }
        self.build()
    }
}
