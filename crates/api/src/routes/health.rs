use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use thinkion_core::store::StatusCounts;
use thinkion_core::types::Timestamp;

use crate::environment::EnvironmentReport;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub timestamp: Timestamp,
    /// Jobs per status.
    pub jobs: StatusCounts,
    pub environment: EnvironmentReport,
    pub environment_issues: Vec<String>,
}

/// GET /health -- service status, job counts and environment checks.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs = state.store.count_by_status().await;
    let (environment, environment_issues) = state.environment.inspect().await;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        jobs,
        environment,
        environment_issues,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
