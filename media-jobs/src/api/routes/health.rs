//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::scheduler::SchedulerStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while admissions are refused.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStatus>,
}

/// Latest telemetry sample and resource decision seen by the scheduler.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler.as_ref().map(|s| s.status());
    let degraded = scheduler.as_ref().is_some_and(|s| s.emergency);

    let body = HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        scheduler,
    };
    let code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": state.start_time.elapsed().as_secs(),
        })),
    )
}
