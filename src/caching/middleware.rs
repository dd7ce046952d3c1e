//! # Cache Middleware
//!
//! Sits between the client and the proxy handler. Eligible requests are
//! answered from the store when possible; misses fall through to the handler
//! and the response is buffered, stored if cacheable, then flushed unchanged.
//!
//! Served responses always carry `X-Cache: HIT` or `X-Cache: MISS`. Requests
//! the cache never considered (ineligible method, credentials, `no-store`)
//! pass through untouched, with no `X-Cache` header at all.

use super::metrics::MetricsRecorder;
use super::stores::{CacheStore, CachedResponse};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const X_CACHE: &str = "x-cache";

/// Shared state for [`cache_middleware`].
#[derive(Clone)]
pub struct CacheState {
    store: Arc<dyn CacheStore>,
    metrics: Arc<MetricsRecorder>,
    bypass: Arc<HashSet<String>>,
}

impl CacheState {
    /// `bypass_paths` are exact paths the cache never considers, such as the
    /// health check and the metrics endpoint itself.
    pub fn new(
        store: Arc<dyn CacheStore>,
        metrics: Arc<MetricsRecorder>,
        bypass_paths: &[&str],
    ) -> Self {
        Self {
            store,
            metrics,
            bypass: Arc::new(bypass_paths.iter().map(|p| p.to_string()).collect()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }
}

/// Serve-or-store middleware. Lookup happens inline; the store write for a
/// miss is the backend's concern and must not delay flushing the response.
pub async fn cache_middleware(
    State(state): State<CacheState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.store.enabled()
        || state.bypass.contains(req.uri().path())
        || !is_cacheable_request(&req)
    {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let key = state.store.key(
        &method,
        req.uri().path(),
        req.uri().query().unwrap_or(""),
    );

    if let Some(cached) = state.store.get(&key).await {
        state.metrics.record_hit();
        debug!(key, "cache hit");
        return serve_hit(cached, &method);
    }

    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();

    // Buffer the full upstream body. The client receives these exact bytes
    // whether or not they end up stored.
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "failed to buffer upstream response body");
            state.metrics.record_miss();
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if is_cacheable_response(parts.status, &parts.headers)
        && (state.store.max_bytes() == 0 || bytes.len() <= state.store.max_bytes())
    {
        state
            .store
            .set(&key, parts.status, &parts.headers, bytes.clone())
            .await;
    }

    state.metrics.record_miss();
    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(bytes)
    };
    Response::from_parts(parts, body)
}

/// Render a stored entry as a response. The stored `Age: 0` is replaced with
/// the entry's actual age so clients can judge staleness.
fn serve_hit(cached: CachedResponse, method: &Method) -> Response {
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(cached.body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = cached.status;
    *response.headers_mut() = cached.headers;

    let headers = response.headers_mut();
    headers.insert(header::AGE, HeaderValue::from(cached.age.as_secs()));
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    response
}

/// A request participates in caching only when it is a safe read without
/// credentials and without an explicit `no-store` directive.
fn is_cacheable_request(req: &Request) -> bool {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return false;
    }
    if req.headers().contains_key(header::AUTHORIZATION) {
        return false;
    }
    !has_no_store(req.headers())
}

/// A response is stored only when it is a success and does not forbid storage.
fn is_cacheable_response(status: StatusCode, headers: &HeaderMap) -> bool {
    status.is_success() && !has_no_store(headers)
}

fn has_no_store(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| {
            value
                .split(',')
                .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
        })
}
