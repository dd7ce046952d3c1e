//! # Response Caching
//!
//! Answers eligible requests from a prior response without reaching the
//! upstream service. One `CacheStore` contract, two backends (in-process map
//! and Redis) selected once at startup, a middleware that orchestrates
//! hit/miss handling, and process-wide hit/miss metrics.
//!
//! Failure policy is fail-open throughout: backend unavailability, corrupt
//! stored payloads, and oversized bodies all degrade to a plain miss. No cache
//! failure may ever prevent the client from receiving the real response.

pub mod metrics;
pub mod middleware;
pub mod stores;

pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use middleware::{cache_middleware, CacheState};
pub use stores::{CacheStore, CachedResponse, InMemoryStore, RedisStore};

use crate::core::config::{CacheBackend, CacheSettings};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache-specific error types. These never escape to the request path: every
/// operation that can fail degrades to a miss instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed stored payload: {message}")]
    Payload { message: String },
}

/// Select and construct the configured backend. A remote backend that cannot
/// even be configured (malformed URL) falls back to the in-process store so a
/// bad config value never takes the gateway down.
pub fn build_store(settings: &CacheSettings) -> Arc<dyn CacheStore> {
    match settings.backend {
        CacheBackend::Redis => match RedisStore::new(settings) {
            Ok(store) => {
                info!(url = %settings.redis_url, "using redis cache backend");
                Arc::new(store)
            }
            Err(err) => {
                warn!(%err, "redis backend unavailable, falling back to in-memory cache");
                Arc::new(InMemoryStore::new(settings))
            }
        },
        CacheBackend::Memory => Arc::new(InMemoryStore::new(settings)),
    }
}
