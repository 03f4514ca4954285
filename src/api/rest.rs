// =============================================================================
// Dashboard/Control REST API — Axum
// =============================================================================
//
// All endpoints live under `/api/v1/`. There is no authentication layer —
// the dashboard surface is read/control for the scanner's own operators,
// not a trading-execution API, so no `AuthBearer` extractor is needed here.
//
// CORS is permissive: the dashboard is a separate static frontend that can
// be served from any origin during development and behind a reverse proxy
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::orchestrator::Orchestrator;

/// Build the dashboard/control router with CORS and shared orchestrator state.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/watchlist", get(watchlist))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/alerts/recent", get(recent_alerts))
        .route("/api/v1/config", post(update_config))
        .route("/api/v1/control/start", post(control_start))
        .route("/api/v1/control/stop", post(control_stop))
        .layer(cors)
        .with_state(orchestrator)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    phase: String,
    watched_symbols: usize,
    server_time: i64,
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        phase: orchestrator.phase().to_string(),
        watched_symbols: orchestrator.store().len(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Watchlist
// =============================================================================

async fn watchlist(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orchestrator.watchlist_snapshot())
}

// =============================================================================
// Per-symbol snapshots
// =============================================================================

async fn symbols(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let spread = orchestrator.config_snapshot().scanning.bid_ask_spread;
    let snapshots: Vec<_> = orchestrator
        .store()
        .symbols()
        .iter()
        .filter_map(|symbol| orchestrator.store().get(symbol).map(|handle| handle.lock().snapshot(spread)))
        .collect();
    Json(snapshots)
}

// =============================================================================
// Recent alerts
// =============================================================================

async fn recent_alerts(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orchestrator.recent_alerts_snapshot())
}

// =============================================================================
// Config update
// =============================================================================

async fn update_config(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(new_config): Json<ScannerConfig>,
) -> impl IntoResponse {
    match orchestrator.update_config(new_config) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "updated" }))).into_response(),
        Err(e) => {
            warn!(error = %e, "rejected config update");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

// =============================================================================
// Control
// =============================================================================

async fn control_start(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    match orchestrator.start().await {
        Ok(()) => {
            info!("scanner started via control API");
            (StatusCode::OK, Json(serde_json::json!({ "phase": orchestrator.phase().to_string() }))).into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to start scanner");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn control_stop(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    orchestrator.stop().await;
    info!("scanner stopped via control API");
    (StatusCode::OK, Json(serde_json::json!({ "phase": orchestrator.phase().to_string() })))
}
