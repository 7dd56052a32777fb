use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use thinkion_core::job::LogLine;
use thinkion_core::types::{parse_job_id, JobId};

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobLogs {
    pub job_id: JobId,
    pub logs: Vec<LogLine>,
    pub total_lines: usize,
}

/// GET /logs/{job_id} -- all log lines accumulated so far, in order.
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobLogs>> {
    let id = parse_job_id(&job_id)?;
    let logs = state.store.log_since(id, 0).await?;
    Ok(Json(JobLogs {
        job_id: id,
        total_lines: logs.len(),
        logs,
    }))
}
