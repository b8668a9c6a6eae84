//! Ops HTTP endpoints
//!
//! - `GET /api/cache/stats` - per-tier and overall counters
//! - `POST /api/cache/warm` - run a warm pass now
//! - `POST /api/cache/clear` - empty every tier
//! - `GET /health` - liveness
//!
//! Cache infrastructure failures never turn into error responses; the
//! facade has already degraded and logged them.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use shelfcache::{Cache, CacheReport, WarmReport, Warmer};
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The cache served by this daemon
    pub cache: Arc<Cache>,
    /// Warmer run by `POST /api/cache/warm`
    pub warmer: Arc<Warmer>,
}

/// Reply of the mutating endpoints
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    /// Human-readable outcome
    pub message: String,
    /// Warm pass counts, for `POST /api/cache/warm`
    #[serde(flatten)]
    pub report: Option<WarmReport>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Router with every ops endpoint
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cache/stats", get(stats))
        .route("/api/cache/warm", post(warm))
        .route("/api/cache/clear", post(clear))
        .route("/health", get(health))
        .with_state(state)
}

async fn stats(State(state): State<AppState>) -> Json<CacheReport> {
    Json(state.cache.stats().await)
}

async fn warm(State(state): State<AppState>) -> Json<MessageResponse> {
    let report = state.warmer.warm_pass().await;
    Json(MessageResponse {
        message: "Cache warming completed".to_string(),
        report: Some(report),
    })
}

async fn clear(State(state): State<AppState>) -> Json<MessageResponse> {
    state.cache.clear().await;
    info!("cache cleared via ops endpoint");
    Json(MessageResponse {
        message: "Cache cleared".to_string(),
        report: None,
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
