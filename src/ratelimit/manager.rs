//! # Rate Limit Manager
//!
//! Owns the shared global bucket and the per-client bucket registry, plus the
//! axum middleware that renders admission decisions on the wire.
//!
//! The registry is a `DashMap` keyed by client identity: registering a new
//! client never blocks lookups of existing ones. A background sweep, running on
//! a fixed interval independent of request traffic, evicts entries idle longer
//! than the configured threshold.

use super::bucket::TokenBucket;
use crate::core::config::RateLimitSettings;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Which bucket tier denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Client,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Global => "global",
            RateLimitScope::Client => "client",
        }
    }
}

/// Structured denial signal. The middleware turns this into the 429 response;
/// no request is ever silently dropped.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitVerdict {
    pub scope: RateLimitScope,
    pub retry_after: Duration,
    pub remaining: u64,
}

/// Result of running a request through both bucket tiers.
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    Granted,
    Denied(RateLimitVerdict),
}

struct ClientEntry {
    bucket: Arc<TokenBucket>,
    last_seen: Mutex<Instant>,
}

/// Two-tier admission: one shared global bucket, then one bucket per client
/// identity. Client buckets are created lazily from the configured
/// `(client_burst, client_rps)` pair.
pub struct RateLimitManager {
    enabled: bool,
    global: TokenBucket,
    clients: Arc<DashMap<String, ClientEntry>>,
    client_rps: f64,
    client_burst: u32,
    sweeper: tokio::task::JoinHandle<()>,
}

impl RateLimitManager {
    /// Build the manager and start its idle sweep. Must be called from within a
    /// tokio runtime; the sweep task is aborted when the manager is dropped.
    pub fn new(settings: &RateLimitSettings) -> Self {
        let clients: Arc<DashMap<String, ClientEntry>> = Arc::new(DashMap::new());

        let sweeper = {
            let clients = Arc::clone(&clients);
            let cleanup_after = settings.cleanup_after;
            let sweep_interval = settings.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                loop {
                    ticker.tick().await;
                    let removed = sweep_idle(&clients, cleanup_after);
                    if removed > 0 {
                        debug!(removed, "evicted idle client buckets");
                    }
                }
            })
        };

        Self {
            enabled: settings.enabled,
            global: TokenBucket::new(settings.global_burst, settings.global_rps),
            clients,
            client_rps: settings.client_rps,
            client_burst: settings.client_burst,
            sweeper,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of registered client buckets.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Run one request through the global bucket, then the client bucket for
    /// `client_key`. The global token is consumed even when the client tier
    /// subsequently denies.
    pub fn check(&self, client_key: &str) -> Admission {
        let global = self.global.allow();
        if !global.admitted {
            return Admission::Denied(RateLimitVerdict {
                scope: RateLimitScope::Global,
                retry_after: global.retry_after,
                remaining: global.remaining,
            });
        }

        let bucket = self.client_bucket(client_key);
        let client = bucket.allow();
        if !client.admitted {
            return Admission::Denied(RateLimitVerdict {
                scope: RateLimitScope::Client,
                retry_after: client.retry_after,
                remaining: client.remaining,
            });
        }

        Admission::Granted
    }

    /// Resolve the bucket for a client identity, creating it on first sight and
    /// refreshing `last_seen` on every lookup.
    fn client_bucket(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(entry) = self.clients.get(key) {
            *entry.last_seen.lock() = Instant::now();
            return Arc::clone(&entry.bucket);
        }

        let entry = self.clients.entry(key.to_string()).or_insert_with(|| ClientEntry {
            bucket: Arc::new(TokenBucket::new(self.client_burst, self.client_rps)),
            last_seen: Mutex::new(Instant::now()),
        });
        Arc::clone(&entry.bucket)
    }
}

impl Drop for RateLimitManager {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Remove client entries idle longer than `cleanup_after`. Returns the number
/// of entries removed.
fn sweep_idle(clients: &DashMap<String, ClientEntry>, cleanup_after: Duration) -> usize {
    let before = clients.len();
    clients.retain(|_, entry| entry.last_seen.lock().elapsed() <= cleanup_after);
    before.saturating_sub(clients.len())
}

/// Shared state for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    manager: Arc<RateLimitManager>,
    bypass: Arc<HashSet<String>>,
}

impl RateLimitState {
    /// `bypass_paths` are exact paths exempt from both bucket tiers; the
    /// health-check path belongs here so liveness probes never flap under load.
    pub fn new(manager: Arc<RateLimitManager>, bypass_paths: &[&str]) -> Self {
        Self {
            manager,
            bypass: Arc::new(bypass_paths.iter().map(|p| p.to_string()).collect()),
        }
    }
}

/// Admission middleware: global bucket, then per-client bucket, then the next
/// handler. Admitted responses carry `RateLimit-Policy`; denials become 429s
/// with `Retry-After`, `RateLimit-Remaining`, and `RateLimit-Scope`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.manager.is_enabled() || state.bypass.contains(req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_key(&req);
    match state.manager.check(&key) {
        Admission::Granted => {
            let mut response = next.run(req).await;
            response.headers_mut().insert(
                "ratelimit-policy",
                HeaderValue::from_static("global, client; unit=second"),
            );
            response
        }
        Admission::Denied(verdict) => {
            debug!(
                client = %key,
                scope = verdict.scope.as_str(),
                retry_after_secs = verdict.retry_after.as_secs(),
                "request rate limited"
            );
            limited_response(&verdict)
        }
    }
}

/// Client identity: left-most `X-Forwarded-For` entry when present, else the
/// connection's remote address.
fn client_key(req: &Request) -> String {
    if let Some(xff) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        let first = xff.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

fn limited_response(verdict: &RateLimitVerdict) -> Response {
    let mut response = Response::new(Body::from(r#"{"error":"too_many_requests"}"#));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if verdict.retry_after > Duration::ZERO {
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(verdict.retry_after.as_secs()),
        );
    }
    headers.insert("ratelimit-remaining", HeaderValue::from(verdict.remaining));
    headers.insert(
        "ratelimit-scope",
        HeaderValue::from_static(verdict.scope.as_str()),
    );
    response
}
