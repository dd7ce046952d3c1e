//! # Gateway Governor - Request Governance Library
//!
//! The request-governance layer of an HTTP gateway. For every inbound request it
//! decides whether to admit it (rate limiting) and whether it can be answered from
//! a prior response without reaching the upstream service (response caching).
//!
//! The surrounding reverse proxy is consumed as an opaque "next handler" that this
//! layer wraps; configuration is consumed as a finished set of typed values.
//!
//! ## Architecture
//! - `core::config`: environment-sourced typed settings with safe defaults
//! - `ratelimit`: token buckets, the two-tier (global + per-client) manager, and
//!   the admission middleware
//! - `caching`: the `CacheStore` contract with in-memory and Redis backends, the
//!   response-caching middleware, and hit/miss metrics
//!
//! Both middlewares are plain axum middleware functions; they compose onto any
//! `axum::Router` via `middleware::from_fn_with_state`.

/// Core functionality: configuration loading and shared settings types
pub mod core;

/// Two-tier token-bucket rate limiting with idle client eviction
pub mod ratelimit;

/// Response caching: store backends, middleware, and metrics
pub mod caching;

// Re-export the types needed to wire the governance layer onto a router.
pub use crate::core::config::{CacheBackend, CacheSettings, RateLimitSettings};
pub use caching::{
    build_store, cache_middleware, CacheError, CacheState, CacheStore, CachedResponse,
    InMemoryStore, MetricsRecorder, MetricsSnapshot, RedisStore,
};
pub use ratelimit::{
    rate_limit_middleware, Admission, RateLimitManager, RateLimitScope, RateLimitState,
    RateLimitVerdict, TokenBucket,
};
