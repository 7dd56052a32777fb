//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use thinkion_core::error::CoreError;
use thinkion_core::job::{JobStatus, JobSummary};
use thinkion_core::types::parse_job_id;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.store.list().await)
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSummary>> {
    let id = parse_job_id(&job_id)?;
    let job = state.store.get(id).await?;
    Ok(Json(job.summary()))
}

/// GET /jobs/{job_id}/result
///
/// The converted rows of a succeeded job; 409 while the job is queued or
/// running and after it failed.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_job_id(&job_id)?;
    let job = state.store.get(id).await?;
    if job.status != JobStatus::Succeeded {
        return Err(CoreError::Conflict(format!(
            "Job {id} is {}; a result is only available once it succeeded",
            job.status
        ))
        .into());
    }
    Ok(Json(job.result.unwrap_or(Value::Null)))
}
