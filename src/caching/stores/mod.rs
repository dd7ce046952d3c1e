//! # Cache Stores
//!
//! The data contract and backend trait every cache store satisfies. The
//! middleware is backend-agnostic: backend selection is a configuration-time
//! choice, never a request-time branch.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// A stored response handed back on a hit. Always an owned copy, so callers can
/// never mutate state shared with the store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Time the entry has already spent in the cache; zero when the backend
    /// cannot tell (the remote backend owns its own TTL clock).
    pub age: Duration,
}

/// One cached response as owned by the in-process store. Mutated only by
/// replacement; destroyed by TTL expiry discovered lazily on `get` or by a
/// periodic sweep.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) expires_at: Instant,
    pub(crate) size: usize,
}

impl CacheEntry {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
        let size = body.len();
        Self {
            status,
            headers,
            body,
            expires_at: Instant::now() + ttl,
            size,
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Contract every cache backend implements.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Derive the cache key for a request line.
    fn key(&self, method: &Method, path: &str, raw_query: &str) -> String;

    /// Look up a stored response. Expired, corrupt, or unreachable entries all
    /// surface as `None`.
    async fn get(&self, key: &str) -> Option<CachedResponse>;

    /// Store a response under `key`, replacing any previous entry. Bodies over
    /// `max_bytes` are silently rejected; failures are logged, never returned.
    async fn set(&self, key: &str, status: StatusCode, headers: &HeaderMap, body: Bytes);

    /// Whether this store serves lookups at all.
    fn enabled(&self) -> bool;

    /// Entry time-to-live.
    fn ttl(&self) -> Duration;

    /// Largest body this store accepts, in bytes (0 = unbounded).
    fn max_bytes(&self) -> usize;

    /// Short backend identifier for the metrics snapshot.
    fn backend_name(&self) -> &'static str;
}

/// Fixed-length digest of `method + " " + path + "?" + raw_query`.
///
/// Collision is accepted as a theoretical risk; the digest space is large and
/// no collision detection is performed.
pub(crate) fn digest_key(method: &Method, path: &str, raw_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(path.as_bytes());
    hasher.update(b"?");
    hasher.update(raw_query.as_bytes());
    hex::encode(hasher.finalize())
}

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Copy `headers` for storage, dropping hop-by-hop and caching-negotiation
/// headers, which are per-connection, not cacheable. The stored copy starts
/// with `Age: 0`; the middleware refreshes it when serving a hit.
pub(crate) fn cacheable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut stored = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        if name == header::CONNECTION || name == header::TRANSFER_ENCODING || name == KEEP_ALIVE {
            continue;
        }
        stored.append(name.clone(), value.clone());
    }
    stored.insert(header::AGE, HeaderValue::from_static("0"));
    stored
}
