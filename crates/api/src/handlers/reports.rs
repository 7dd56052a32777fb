//! Handlers for the report catalog (`/config/reports`).

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use thinkion_core::report::ReportDefinition;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReportsConfig {
    pub reports_config: Vec<ReportDefinition>,
}

/// GET /config/reports
pub async fn get_reports_config(State(state): State<AppState>) -> Json<Vec<ReportDefinition>> {
    Json(state.catalog.list().await)
}

/// POST /config/reports
///
/// Replace the whole catalog. Invalid entries reject the request and leave
/// the current catalog untouched.
pub async fn update_reports_config(
    State(state): State<AppState>,
    Json(reports): Json<Vec<ReportDefinition>>,
) -> AppResult<Json<ReportsConfig>> {
    state.catalog.replace(reports).await?;
    let reports_config = state.catalog.list().await;
    tracing::info!(reports = reports_config.len(), "Report catalog replaced");
    Ok(Json(ReportsConfig { reports_config }))
}
