//! Ops endpoints driven through the router with `oneshot`

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures_util::FutureExt;
use serde_json::{json, Value};
use shelfcache::{Cache, CacheOptions, WarmEntry, Warmer, DEFAULT_WARM_INTERVAL};
use shelfd::http::{router, AppState};
use tower::ServiceExt; // for `oneshot`

fn app() -> (Router, Arc<Cache>) {
    let cache = Arc::new(Cache::in_memory(10, 100));
    let entry = WarmEntry::new("dashboard:stats", || {
        async { Ok(json!({ "revenue": 10 })) }.boxed()
    });
    let warmer = Arc::new(Warmer::new(cache.clone(), vec![entry], DEFAULT_WARM_INTERVAL));

    let app = router(AppState {
        cache: cache.clone(),
        warmer,
    });
    (app, cache)
}

async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = call(app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_stats_shape() {
    let (app, cache) = app();
    cache.set("a", &1, &CacheOptions::NONE).await;
    cache.get::<i32>("a", &CacheOptions::NONE).await;
    cache.get::<i32>("b", &CacheOptions::NONE).await;

    let (status, body) = call(app, Method::GET, "/api/cache/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["l1"]["hits"], 1);
    assert_eq!(body["l1"]["misses"], 1);
    assert_eq!(body["l1"]["size"], 1);
    assert_eq!(body["l1"]["evictions"], 0);
    assert_eq!(body["l2"]["size"], 1);
    assert_eq!(body["overall"]["hits"], 1);
    assert_eq!(body["overall"]["misses"], 1);
    assert_eq!(body["overall"]["hitRate"], 0.5);
}

#[tokio::test]
async fn test_warm_endpoint() {
    let (app, cache) = app();
    let (status, body) = call(app, Method::POST, "/api/cache/warm").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Cache warming completed");
    assert_eq!(body["warmed"], 1);
    assert_eq!(
        cache.get::<Value>("dashboard:stats", &CacheOptions::NONE).await,
        Some(json!({ "revenue": 10 }))
    );
}

#[tokio::test]
async fn test_clear_endpoint() {
    let (app, cache) = app();
    cache.set("a", &1, &CacheOptions::NONE).await;

    let (status, body) = call(app, Method::POST, "/api/cache/clear").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Cache cleared" }));
    assert!(!cache.exists("a", &CacheOptions::NONE).await);
}

#[tokio::test]
async fn test_wrong_method_is_rejected() {
    let (app, _) = app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/cache/clear")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
