//! Error types for rate limiting operations.
//!
//! The core surfaces exactly two error families to callers: `InvalidArgument`
//! for bad input/config, and `Storage` once the retry policy has been
//! exhausted. Transient failures during a retry loop never escape this
//! module.

use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Bad call argument (e.g. `permits <= 0`) or invalid configuration.
    /// Never retried, raised synchronously.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage backend error that survived the retry policy.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error raised at construction time.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RateLimitError {
    /// Shorthand for the `InvalidArgument` variant.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Storage-related errors. Internal-only `Transient` failures are folded into
/// retry logic and never constructed outside the retry loop; only the
/// terminal error after retries are exhausted is returned here.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed after exhausting the retry budget.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the underlying cause is, in principle, retryable (kept
        /// for diagnostics; the retry loop has already given up by the
        /// time this variant is constructed).
        retryable: bool,
    },

    /// Connection pool exhausted within the borrow-timeout window.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A `compare_and_set` detected a concurrent write between read and
    /// write and lost the race.
    #[error("atomic operation failed, state was modified concurrently")]
    AtomicConflict,

    /// Server-side atomic script failed to execute or returned a shape the
    /// adapter could not parse.
    #[error("script execution failed: {0}")]
    ScriptError(String),

    /// Serialization/deserialization error decoding a stored value.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Create a new operation-failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the underlying cause looked retryable before the retry
    /// budget was spent. Diagnostic only.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::AtomicConflict | Self::PoolExhausted => true,
            Self::ScriptError(_) | Self::Serialization(_) => false,
        }
    }
}

/// Configuration-related errors, raised at construction time from
/// `LimiterConfig::build`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_permits` was zero.
    #[error("max_permits must be greater than zero")]
    InvalidMaxPermits,

    /// `window` was zero.
    #[error("window must be greater than zero")]
    InvalidWindow,

    /// `refill_rate` was zero or negative where the token bucket requires
    /// a positive refill rate.
    #[error("refill_rate must be greater than zero for a token bucket")]
    InvalidRefillRate,

    /// `local_cache_ttl` was zero while `local_cache_enabled` was true.
    #[error("local_cache_ttl must be greater than zero when caching is enabled")]
    InvalidCacheTtl,

    /// Storage/pool configuration was invalid (e.g. `pool_max < pool_idle_min`).
    #[error("invalid storage configuration: {0}")]
    InvalidStorage(String),
}
