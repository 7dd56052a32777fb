//! Handlers for downloaded report files (`/files/{job_id}`).
//!
//! File names are validated as single path components; anything that could
//! leave the job directory is rejected with 400.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use thinkion_core::downloads::DownloadedFile;
use thinkion_core::error::CoreError;
use thinkion_core::types::{parse_job_id, JobId};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobFiles {
    pub job_id: JobId,
    pub files: Vec<DownloadedFile>,
    pub total_files: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
    pub message: String,
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    pub filenames: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedDeletion {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct DeleteResults {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteFilesResponse {
    /// `success`, or `partial` when any deletion failed.
    pub status: &'static str,
    pub job_id: JobId,
    pub results: DeleteResults,
}

/// GET /files/{job_id}
pub async fn list_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobFiles>> {
    let id = parse_job_id(&job_id)?;
    let files = state.downloads.list(id).await?;
    Ok(Json(JobFiles {
        job_id: id,
        total_files: files.len(),
        files,
    }))
}

/// GET /files/{job_id}/{filename} -- raw file bytes as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let id = parse_job_id(&job_id)?;
    let path = state.downloads.file_path(id, &filename).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to read {}: {e}", path.display())))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}

/// DELETE /files/{job_id}
pub async fn delete_job_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DeleteResponse>> {
    let id = parse_job_id(&job_id)?;
    state.downloads.delete_all(id).await?;
    tracing::info!(job_id = %id, "Deleted all job files");
    Ok(Json(DeleteResponse {
        status: "success",
        message: format!("All files for job {id} have been deleted"),
        job_id: id,
        filename: None,
    }))
}

/// DELETE /files/{job_id}/{filename}
pub async fn delete_file(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> AppResult<Json<DeleteResponse>> {
    let id = parse_job_id(&job_id)?;
    state.downloads.delete_file(id, &filename).await?;
    tracing::info!(job_id = %id, filename = %filename, "Deleted job file");
    Ok(Json(DeleteResponse {
        status: "success",
        message: format!("File {filename} has been deleted"),
        job_id: id,
        filename: Some(filename),
    }))
}

/// POST /files/{job_id}/delete
///
/// Delete several files; each name is reported as deleted, failed or not
/// found. 404 only when the job has no file directory at all.
pub async fn delete_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(input): Json<DeleteFilesRequest>,
) -> AppResult<Json<DeleteFilesResponse>> {
    let id = parse_job_id(&job_id)?;
    state.downloads.list(id).await?;

    let mut results = DeleteResults::default();
    for filename in input.filenames {
        match state.downloads.delete_file(id, &filename).await {
            Ok(()) => results.deleted.push(filename),
            Err(CoreError::NotFound { .. }) => results.not_found.push(filename),
            Err(e) => results.failed.push(FailedDeletion {
                filename,
                error: e.to_string(),
            }),
        }
    }

    let status = if results.failed.is_empty() {
        "success"
    } else {
        "partial"
    };
    tracing::info!(
        job_id = %id,
        deleted = results.deleted.len(),
        failed = results.failed.len(),
        not_found = results.not_found.len(),
        "Bulk file deletion",
    );
    Ok(Json(DeleteFilesResponse {
        status,
        job_id: id,
        results,
    }))
}
