//! # In-Process Cache Store
//!
//! A hash map guarded by a single read/write lock: readers concurrent, any
//! mutation exclusive. Expiry is lazy: an expired entry is discovered on the
//! next `get` or reclaimed by a sweep, never by a per-entry timer.
//!
//! Capacity is a soft bound: when the map reaches `max_entries`, an inline
//! sweep deletes all expired entries before the insert. This is expiry-driven
//! reclamation, not LRU, so a map full of non-expired hot entries can exceed the
//! nominal cap until TTL catches up.

use super::{cacheable_headers, digest_key, CacheEntry, CacheStore, CachedResponse};
use crate::core::config::CacheSettings;
use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

type EntryMap = HashMap<String, CacheEntry>;

/// In-process cache backend.
pub struct InMemoryStore {
    entries: Arc<RwLock<EntryMap>>,
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    max_bytes: usize,
    sweeper: tokio::task::JoinHandle<()>,
}

impl InMemoryStore {
    /// Build the store and start its periodic expiry sweep. Must be called from
    /// within a tokio runtime; the sweep task is aborted when the store drops.
    pub fn new(settings: &CacheSettings) -> Self {
        let entries: Arc<RwLock<EntryMap>> = Arc::new(RwLock::new(HashMap::new()));

        let sweeper = {
            let entries = Arc::clone(&entries);
            let sweep_interval = settings.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                loop {
                    ticker.tick().await;
                    let mut map = entries.write().await;
                    let reclaimed = evict_expired(&mut map);
                    drop(map);
                    if reclaimed > 0 {
                        debug!(reclaimed, "cache expiry sweep");
                    }
                }
            })
        };

        Self {
            entries,
            enabled: settings.enabled,
            ttl: settings.ttl,
            max_entries: settings.max_entries,
            max_bytes: settings.max_bytes,
            sweeper,
        }
    }

    /// Current number of stored entries, expired or not.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Delete all expired entries. Returns the number reclaimed.
fn evict_expired(entries: &mut EntryMap) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn key(&self, method: &Method, path: &str, raw_query: &str) -> String {
        digest_key(method, path, raw_query)
    }

    async fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }

        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        let now = Instant::now();
        if entry.is_expired(now) {
            // Lazy expiry: report a miss, leave reclamation to the sweeps.
            return None;
        }

        Some(CachedResponse {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            age: self.ttl.saturating_sub(entry.expires_at.saturating_duration_since(now)),
        })
    }

    async fn set(&self, key: &str, status: StatusCode, headers: &HeaderMap, body: Bytes) {
        if !self.enabled {
            return;
        }
        if self.max_bytes > 0 && body.len() > self.max_bytes {
            debug!(size = body.len(), max = self.max_bytes, "body too large to cache");
            return;
        }

        let entry = CacheEntry::new(status, cacheable_headers(headers), body, self.ttl);
        let size = entry.size;

        let mut entries = self.entries.write().await;
        if self.max_entries > 0 && entries.len() >= self.max_entries {
            let reclaimed = evict_expired(&mut entries);
            if reclaimed > 0 {
                debug!(reclaimed, "inline expiry sweep before insert");
            }
        }
        entries.insert(key.to_string(), entry);
        debug!(key, size, "cached response");
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
