//! Redis-backed storage adapter.
//!
//! Connection pooling follows the donor's `deadpool_redis::Pool` usage;
//! the token-bucket atomic primitive is implemented as a genuine Lua
//! `EVAL` script so the read-modify-write is indivisible on the server,
//! rather than the separate-GET-then-SET round trips a naive port would
//! produce.

use std::time::Duration;

use deadpool_redis::redis::{cmd, AsyncCommands, Script};
use deadpool_redis::{Config, Connection, Pool, Runtime};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::PoolConfig;
use crate::error::{Result, StorageError};
use crate::storage::{current_timestamp_ms, with_retry, HashFields, ScriptOutcome, StorageAdapter};

/// Minimum time a pooled connection may sit idle between borrows before
/// `conn()` revalidates it with a `PING`. Tracked per adapter, not per
/// connection: `deadpool_redis` does not expose per-object idle metadata
/// without a custom `Manager`, so this approximates "borrowed connections
/// are validated before use" at the pool level rather than truly per-object.
const CONNECTION_STALENESS_THRESHOLD_MS: u64 = 5_000;

/// Connection parameters for [`RedisStorageAdapter`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL, e.g. `redis://localhost:6379`.
    pub url: String,
    /// Key prefix prepended to every key this adapter touches.
    pub key_prefix: String,
    /// Connection pool sizing.
    pub pool: PoolConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: String::new(),
            pool: PoolConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Start from a connection URL with otherwise-default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Prefix every key this adapter issues with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Override the connection pool sizing.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// The token-bucket atomic script contract from spec §6: five arguments
/// `(capacity, refill_rate_per_ms, requested, now_ms, ttl_ms)`, one key.
/// Returns a two-element array `[0|1, tokens_after]`.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate_per_ms = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local tokens = redis.call('HGET', key, 'tokens')
local last_refill = redis.call('HGET', key, 'last_refill')

if tokens == false then
    tokens = capacity
    last_refill = now_ms
else
    tokens = tonumber(tokens)
    last_refill = tonumber(last_refill)
end

local elapsed = now_ms - last_refill
if elapsed < 0 then
    elapsed = 0
end
tokens = math.min(capacity, tokens + elapsed * refill_rate_per_ms)

local allowed = 0
if tokens >= requested then
    tokens = tokens - requested
    last_refill = now_ms
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', tostring(last_refill))
redis.call('PEXPIRE', key, ttl_ms)

return {allowed, tostring(tokens)}
"#;

/// Redis-backed [`StorageAdapter`].
pub struct RedisStorageAdapter {
    pool: Pool,
    key_prefix: String,
    script: Script,
    last_validated_ms: AtomicU64,
}

impl std::fmt::Debug for RedisStorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorageAdapter")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStorageAdapter {
    /// Create a pool and validate connectivity with a `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(deadpool_redis::PoolConfig {
            max_size: config.pool.max_size,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(config.pool.borrow_timeout),
                create: Some(config.pool.borrow_timeout),
                recycle: Some(config.pool.borrow_timeout),
            },
            queue_mode: deadpool_redis::QueueMode::Fifo,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::operation_failed(e.to_string(), false))?;

        let adapter = Self {
            pool,
            key_prefix: config.key_prefix,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
            last_validated_ms: AtomicU64::new(0),
        };
        adapter.available().await?;
        adapter
            .last_validated_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
        Ok(adapter)
    }

    /// Create a pool from a bare URL with default pool sizing.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Borrow a connection from the pool, revalidating it with a `PING`
    /// when more time than `CONNECTION_STALENESS_THRESHOLD_MS` has passed
    /// since the last validation.
    async fn conn(&self) -> Result<Connection> {
        let mut conn: Connection = self
            .pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted)?;

        let now = current_timestamp_ms();
        let last = self.last_validated_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > CONNECTION_STALENESS_THRESHOLD_MS {
            let _: () = cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            self.last_validated_ms.store(now, Ordering::Relaxed);
        }

        Ok(conn)
    }
}

impl StorageAdapter for RedisStorageAdapter {
    async fn incr_and_expire(&self, key: &str, ttl: Duration) -> Result<u64> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let ttl_ms = ttl.as_millis() as i64;
            let (count,): (u64,) = deadpool_redis::redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(&full_key)
                .cmd("PEXPIRE")
                .arg(&full_key)
                .arg(ttl_ms)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            Ok(count)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let value: Option<u64> = conn
                .get(&full_key)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            Ok(value.unwrap_or(0))
        })
        .await
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let ttl_ms = ttl.as_millis() as u64;
            let _: () = cmd("SET")
                .arg(&full_key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            Ok(())
        })
        .await
    }

    async fn compare_and_set(&self, key: &str, expect: u64, update: u64) -> Result<bool> {
        const CAS_SCRIPT: &str = r#"
            local current = redis.call('GET', KEYS[1])
            if (current == false and tonumber(ARGV[1]) == 0) or (current ~= false and tonumber(current) == tonumber(ARGV[1])) then
                redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
                return 1
            end
            return 0
        "#;
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let script = Script::new(CAS_SCRIPT);
            let result: i32 = script
                .key(&full_key)
                .arg(expect)
                .arg(update)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            Ok(result == 1)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let _: u64 = conn
                .del(&full_key)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            Ok(())
        })
        .await
    }

    async fn eval_script(&self, key: &str, args: &[String]) -> Result<ScriptOutcome> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            let mut invocation = self.script.key(&full_key);
            for arg in args {
                invocation.arg(arg);
            }
            let (allowed, tokens_after): (i64, String) = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StorageError::ScriptError(e.to_string()))?;
            let tokens_after: f64 = tokens_after
                .parse()
                .map_err(|_| StorageError::Serialization("script returned non-numeric tokens".into()))?;
            Ok(ScriptOutcome {
                allowed: allowed == 1,
                tokens_after,
            })
        })
        .await
    }

    async fn get_token_bucket_tokens(&self, key: &str) -> Result<f64> {
        let full_key = self.full_key(key);
        with_retry(|| async {
            let mut conn = self.conn().await?;
            // Token-bucket state is `HSET` by the Lua script, never `SET`;
            // reading it with `GET` would raise `WRONGTYPE`.
            let value: Option<String> = conn
                .hget(&full_key, "tokens")
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            match value {
                Some(raw) => {
                    let tokens: f64 = raw
                        .parse()
                        .map_err(|_| StorageError::Serialization("corrupt tokens field".into()))?;
                    Ok(tokens)
                }
                None => Ok(0.0),
            }
        })
        .await
    }

    async fn available(&self) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted)?;
        let _: () = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
        self.last_validated_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
        Ok(true)
    }
}

/// A hash of `key -> (field, value)` pairs is not exposed directly by this
/// adapter; the token-bucket state lives entirely server-side inside the
/// atomic script. This type alias documents the shape for readers coming
/// from [`super::HashFields`].
pub type TokenBucketHash = HashFields;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_config_defaults() {
        let cfg = RedisConfig::new("redis://localhost:6380").with_prefix("test:");
        assert_eq!(cfg.url, "redis://localhost:6380");
        assert_eq!(cfg.key_prefix, "test:");
        assert_eq!(cfg.pool.max_size, 128);
    }

    /// Requires a live Redis instance at `redis://localhost:6379`; run
    /// explicitly with `cargo test -- --ignored` against a local server.
    /// Guards against a regression back to `GET` on the token-bucket hash,
    /// which Redis rejects with `WRONGTYPE`.
    #[tokio::test]
    #[ignore = "requires a live redis instance"]
    async fn get_token_bucket_tokens_reads_hash_field_without_wrongtype() {
        let adapter = RedisStorageAdapter::from_url("redis://localhost:6379")
            .await
            .unwrap();
        let key = "test:tb:wrongtype-guard";
        let args = vec![
            "10".to_string(),
            "0.0".to_string(),
            "4".to_string(),
            "0".to_string(),
            "60000".to_string(),
        ];
        adapter.eval_script(key, &args).await.unwrap();

        let tokens = adapter.get_token_bucket_tokens(key).await.unwrap();
        assert_eq!(tokens, 6.0);

        adapter.delete(key).await.unwrap();
    }
}
