use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::refresh::RefreshService;
use crate::state::{Delivered, ReportCache};
use crate::types::Report;

#[derive(Clone)]
pub struct ApiState {
    pub cache: Arc<ReportCache>,
    pub refresh: Arc<RefreshService>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub themes: Arc<Vec<String>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/themes", get(get_themes))
        .route("/report/:theme", get(get_report))
        .route("/refresh/:theme", post(post_refresh))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub refreshes_in_flight: u64,
    pub refreshes_completed: u64,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub last_error: Option<String>,
    pub deliveries: Vec<DeliveryStatus>,
}

#[derive(Serialize)]
pub struct DeliveryStatus {
    pub theme: String,
    pub ok: bool,
    pub delivered_at: i64,
    pub request_seq: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last_error = h.last_error();
    Json(HealthResponse {
        status: if last_error.is_none() { "ok" } else { "degraded" },
        refreshes_in_flight: h.refreshes_in_flight(),
        refreshes_completed: h.refreshes_completed(),
        last_success_at: nonzero(h.last_success_at()),
        last_failure_at: nonzero(h.last_failure_at()),
        last_error,
        deliveries: state
            .cache
            .themes()
            .into_iter()
            .filter_map(|theme| {
                let entry = state.cache.get(&theme)?;
                Some(DeliveryStatus {
                    ok: matches!(entry.delivered, Delivered::Report(_)),
                    delivered_at: entry.delivered_at,
                    request_seq: entry.request_seq,
                    theme,
                })
            })
            .collect(),
    })
}

async fn get_themes(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.themes.as_ref().clone())
}

async fn get_report(
    State(state): State<ApiState>,
    Path(theme): Path<String>,
) -> Result<Json<Report>, AppError> {
    let entry = state
        .cache
        .get(&theme)
        .ok_or_else(|| AppError::NoData(theme.clone()))?;

    match entry.delivered {
        Delivered::Report(report) => Ok(Json(report.as_ref().clone())),
        Delivered::Error(message) => Err(AppError::RefreshFailed { theme, message }),
    }
}

async fn post_refresh(
    State(state): State<ApiState>,
    Path(theme): Path<String>,
) -> Result<Json<Report>, AppError> {
    let report = state
        .refresh
        .submit(&theme)
        .await
        .map_err(|_| AppError::TaskDropped)??;
    Ok(Json(report.as_ref().clone()))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let ms = |us: Option<u64>| us.map(|v| v as f64 / 1000.0);
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: ms(p50),
        p95_ms: ms(p95),
        p99_ms: ms(p99),
    })
}

fn nonzero(ts: i64) -> Option<i64> {
    (ts != 0).then_some(ts)
}
