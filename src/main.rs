//! Gateway binary: a reverse proxy wrapped in the governance layer.
//!
//! The proxy itself is deliberately thin. Everything interesting happens in
//! the middleware stack: rate limiting admits or rejects the request, then the
//! cache decides whether the upstream is consulted at all.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gateway_governor::{
    build_store, cache_middleware, core::config, rate_limit_middleware, CacheSettings, CacheState,
    CacheStore, MetricsRecorder, RateLimitManager, RateLimitSettings, RateLimitState,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Largest request or upstream body the proxy will buffer.
const MAX_PROXY_BODY: usize = 16 << 20;

const HEALTH_PATH: &str = "/healthz";
const METRICS_PATH: &str = "/admin/cache/metrics";

#[derive(Clone)]
struct AppState {
    http: reqwest::Client,
    upstream: String,
    started: Instant,
    store: Arc<dyn CacheStore>,
    metrics: Arc<MetricsRecorder>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gateway_governor=info,tower_http=info")),
        )
        .init();

    let rate_settings = RateLimitSettings::from_env();
    let cache_settings = CacheSettings::from_env();
    let port: u16 = config::env_parse("PORT", 8080);
    let upstream = config::env_str("UPSTREAM_URL", "http://127.0.0.1:9000");

    let store = build_store(&cache_settings);
    let metrics = Arc::new(MetricsRecorder::new());
    let manager = Arc::new(RateLimitManager::new(&rate_settings));

    info!(
        backend = store.backend_name(),
        ttl_secs = store.ttl().as_secs(),
        rate_limiting = rate_settings.enabled,
        %upstream,
        "starting gateway"
    );

    let state = AppState {
        http: reqwest::Client::new(),
        upstream: upstream.trim_end_matches('/').to_string(),
        started: Instant::now(),
        store: Arc::clone(&store),
        metrics: Arc::clone(&metrics),
    };

    let cache_state = CacheState::new(store, metrics, &[HEALTH_PATH, METRICS_PATH]);
    let rate_state = RateLimitState::new(manager, &[HEALTH_PATH]);

    // Layers run outermost-last: admission happens before any cache lookup.
    let app = Router::new()
        .route(HEALTH_PATH, get(health))
        .route(METRICS_PATH, get(cache_metrics))
        .route("/demo/time", get(demo_time))
        .fallback(proxy)
        .with_state(state)
        .layer(middleware::from_fn_with_state(cache_state, cache_middleware))
        .layer(middleware::from_fn_with_state(
            rate_state,
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "uptime_ms": state.started.elapsed().as_millis() as u64,
    }))
}

async fn cache_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(
        state
            .metrics
            .snapshot(state.store.backend_name(), state.store.ttl()),
    )
}

/// Demo endpoint for poking at the cache: a hit keeps serving the same
/// timestamp until the TTL lapses.
async fn demo_time() -> impl IntoResponse {
    let unix_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Json(json!({ "unix_ms": unix_ms }))
}

/// Forward a request to the upstream and relay the response.
///
/// Hop-by-hop headers are stripped in both directions; any upstream failure
/// surfaces as a 502 rather than a hung connection.
async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path_and_query);
    let method = req.method().clone();

    let mut headers = req.headers().clone();
    headers.remove(header::HOST);

    let body = match to_bytes(req.into_body(), MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "request body too large or unreadable");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let upstream_response = match state
        .http
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            error!(%err, url, "upstream request failed");
            return bad_gateway();
        }
    };

    let status = upstream_response.status();
    let mut headers = upstream_response.headers().clone();
    headers.remove(header::CONNECTION);
    headers.remove(header::TRANSFER_ENCODING);

    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, url, "failed to read upstream response body");
            return bad_gateway();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn bad_gateway() -> Response {
    let mut response = Response::new(Body::from(r#"{"error":"bad_gateway"}"#));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
