//! Handler for `POST /download`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use thinkion_core::job::JobStatus;
use thinkion_core::report::DownloadRequest;
use thinkion_core::types::JobId;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DownloadAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// POST /download
///
/// Validate the request, resolve the report and queue a job. Returns 202
/// right away; the run happens in the background.
pub async fn start_download(
    State(state): State<AppState>,
    Json(input): Json<DownloadRequest>,
) -> AppResult<impl IntoResponse> {
    input.check()?;
    let report = state.catalog.resolve(&input.report).await?;
    let today = chrono::Local::now().date_naive();
    let params = input.into_parameters(report, &state.account, today);

    let job_id = state.supervisor.submit(params).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadAccepted {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}
