//! Process-wide cache hit/miss counters.
//!
//! Plain atomic counters with relaxed ordering: the numbers feed an
//! operator-facing snapshot, not any control decision, so cross-counter
//! consistency under concurrent load is not required.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic hit/miss counters for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time view of the counters, shaped for the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub backend: String,
    pub ttl_seconds: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters. The ratio is defined as 0 before any lookup has
    /// been recorded.
    pub fn snapshot(&self, backend: &str, ttl: Duration) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        MetricsSnapshot {
            hits,
            misses,
            hit_ratio,
            backend: backend.to_string(),
            ttl_seconds: ttl.as_secs(),
        }
    }
}
