//! Metrics sink.
//!
//! Registers and emits the five fixed counter names from the metrics
//! contract. Export (Prometheus, StatsD, ...) is a collaborator's concern;
//! this module only installs descriptions against whatever global
//! `metrics::Recorder` the host process has set up and provides one-line
//! helpers for the hot path so call sites never hand-format a metric name.

use metrics::{describe_counter, Unit};

const REQUESTS_ALLOWED: &str = "ratelimiter.requests.allowed";
const REQUESTS_REJECTED: &str = "ratelimiter.requests.rejected";
const CACHE_HITS: &str = "ratelimiter.cache.hits";
const TOKENBUCKET_ALLOWED: &str = "ratelimiter.tokenbucket.allowed";
const TOKENBUCKET_REJECTED: &str = "ratelimiter.tokenbucket.rejected";

/// Register HELP text for every counter this crate emits. Call once at
/// startup, after a recorder has been installed; idempotent if called more
/// than once.
pub fn describe() {
    describe_counter!(
        REQUESTS_ALLOWED,
        Unit::Count,
        "Requests allowed by the sliding-window limiter"
    );
    describe_counter!(
        REQUESTS_REJECTED,
        Unit::Count,
        "Requests rejected by the sliding-window limiter"
    );
    describe_counter!(
        CACHE_HITS,
        Unit::Count,
        "Decisions short-circuited by the local decision cache"
    );
    describe_counter!(
        TOKENBUCKET_ALLOWED,
        Unit::Count,
        "Requests allowed by the token-bucket limiter"
    );
    describe_counter!(
        TOKENBUCKET_REJECTED,
        Unit::Count,
        "Requests rejected by the token-bucket limiter"
    );
}

/// Record a sliding-window accept.
pub fn record_allowed() {
    metrics::counter!(REQUESTS_ALLOWED).increment(1);
}

/// Record a sliding-window reject.
pub fn record_rejected() {
    metrics::counter!(REQUESTS_REJECTED).increment(1);
}

/// Record a local-cache short-circuit hit (sliding window only).
pub fn record_cache_hit() {
    metrics::counter!(CACHE_HITS).increment(1);
}

/// Record a token-bucket accept.
pub fn record_tokenbucket_allowed() {
    metrics::counter!(TOKENBUCKET_ALLOWED).increment(1);
}

/// Record a token-bucket reject.
pub fn record_tokenbucket_rejected() {
    metrics::counter!(TOKENBUCKET_REJECTED).increment(1);
}
