//! End-to-end tests of the governance stack: a stub upstream router wrapped in
//! the cache and rate-limit middlewares, driven through `tower::ServiceExt`.

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use gateway_governor::{
    cache_middleware, rate_limit_middleware, CacheSettings, CacheState, CacheStore, InMemoryStore,
    MetricsRecorder, RateLimitManager, RateLimitSettings, RateLimitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn cache_settings() -> CacheSettings {
    CacheSettings {
        enabled: true,
        ttl: Duration::from_secs(30),
        max_entries: 100,
        max_bytes: 1 << 20,
        sweep_interval: Duration::from_secs(3600),
        ..CacheSettings::default()
    }
}

// Refill is effectively frozen so admissions are driven by burst alone.
fn rate_settings(global_burst: u32, client_burst: u32) -> RateLimitSettings {
    RateLimitSettings {
        enabled: true,
        global_rps: 0.001,
        global_burst,
        client_rps: 0.001,
        client_burst,
        cleanup_after: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(3600),
    }
}

/// Stub upstream. `/data` counts how many requests actually reached it.
fn upstream(hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/data",
            get(move || {
                let hits = hits.clone();
                async move {
                    let serial = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        [(header::CONTENT_TYPE, "application/json")],
                        format!("{{\"serial\":{serial}}}"),
                    )
                }
            }),
        )
        .route(
            "/volatile",
            get(|| async {
                ([(header::CACHE_CONTROL, "no-store")], "fresh every time")
            }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        )
        .route("/healthz", get(|| async { "ok" }))
}

fn governed(
    upstream: Router,
    cache: CacheSettings,
    rate: RateLimitSettings,
) -> (Router, Arc<MetricsRecorder>) {
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new(&cache));
    let metrics = Arc::new(MetricsRecorder::new());
    let cache_state = CacheState::new(store, Arc::clone(&metrics), &["/healthz"]);
    let rate_state = RateLimitState::new(Arc::new(RateLimitManager::new(&rate)), &["/healthz"]);

    let app = upstream
        .layer(middleware::from_fn_with_state(cache_state, cache_middleware))
        .layer(middleware::from_fn_with_state(
            rate_state,
            rate_limit_middleware,
        ));
    (app, metrics)
}

fn get_req(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn miss_then_hit_serves_identical_bytes_from_one_upstream_call() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(100, 100));

    let first = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    let first_body = body_bytes(first).await;

    let second = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert!(second.headers().contains_key(header::AGE));
    let second_body = body_bytes(second).await;

    assert_eq!(first_body, second_body);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn credentialed_requests_never_touch_the_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(100, 100));

    let mut req = get_req("/data");
    req.headers_mut()
        .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
    let authed = app.clone().oneshot(req).await.unwrap();
    assert_eq!(authed.status(), StatusCode::OK);
    assert!(authed.headers().get("x-cache").is_none());

    // The credentialed response was not stored, so a plain read is a miss.
    let plain = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(plain.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_global_bucket_rejects_with_machine_readable_429() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(1, 100));

    let admitted = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(
        admitted.headers().get("ratelimit-policy").unwrap(),
        "global, client; unit=second"
    );

    let denied = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers().get("ratelimit-scope").unwrap(), "global");
    assert_eq!(denied.headers().get("ratelimit-remaining").unwrap(), "0");
    assert!(denied.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        denied.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_bytes(denied).await, br#"{"error":"too_many_requests"}"#);

    // The denied request never reached the upstream.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_buckets_isolate_forwarded_identities() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(100, 1));

    let from = |ip: &str| {
        let mut req = get_req("/volatile");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_str(ip).unwrap());
        req
    };

    assert_eq!(
        app.clone().oneshot(from("10.0.0.1")).await.unwrap().status(),
        StatusCode::OK
    );
    let denied = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers().get("ratelimit-scope").unwrap(), "client");

    // A different identity has its own untouched bucket.
    assert_eq!(
        app.clone().oneshot(from("10.0.0.2")).await.unwrap().status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn health_path_is_exempt_from_admission_and_caching() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(1, 1));

    for _ in 0..3 {
        let response = app.clone().oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("ratelimit-policy").is_none());
        assert!(response.headers().get("x-cache").is_none());
    }
}

#[tokio::test]
async fn head_hit_is_served_with_an_empty_body() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(100, 100));

    let head = || {
        Request::builder()
            .method(Method::HEAD)
            .uri("/data")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(head()).await.unwrap();
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    assert!(body_bytes(first).await.is_empty());

    let second = app.clone().oneshot(head()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert!(body_bytes(second).await.is_empty());
}

#[tokio::test]
async fn request_no_store_bypasses_the_cache_entirely() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits.clone()), cache_settings(), rate_settings(100, 100));

    let mut req = get_req("/data");
    req.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-cache").is_none());

    let plain = app.clone().oneshot(get_req("/data")).await.unwrap();
    assert_eq!(plain.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upstream_no_store_response_is_never_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits), cache_settings(), rate_settings(100, 100));

    for _ in 0..2 {
        let response = app.clone().oneshot(get_req("/volatile")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
}

#[tokio::test]
async fn non_success_responses_are_never_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, _) = governed(upstream(hits), cache_settings(), rate_settings(100, 100));

    for _ in 0..2 {
        let response = app.clone().oneshot(get_req("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    }
}

#[tokio::test]
async fn metrics_account_for_every_cache_lookup() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (app, metrics) = governed(upstream(hits), cache_settings(), rate_settings(100, 100));

    let total = 4;
    for _ in 0..total {
        app.clone().oneshot(get_req("/data")).await.unwrap();
    }

    let snapshot = metrics.snapshot("memory", Duration::from_secs(30));
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, total - 1);
    let expected = (total - 1) as f64 / total as f64;
    assert!((snapshot.hit_ratio - expected).abs() < f64::EPSILON);
}
