pub mod download;
pub mod files;
pub mod health;
pub mod jobs;
pub mod logs;
pub mod reports;

use axum::Router;

use crate::state::AppState;

/// Build the route tree (health is mounted separately).
///
/// ```text
/// /download                          submit a report job (POST)
///
/// /jobs                              list jobs
/// /jobs/{job_id}                     job status
/// /jobs/{job_id}/result              converted rows of a succeeded job
///
/// /logs/{job_id}                     job log lines
///
/// /files/{job_id}                    list, delete all
/// /files/{job_id}/{filename}         download, delete
/// /files/{job_id}/delete             delete several (POST)
///
/// /config/reports                    get, replace the report catalog
/// ```
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .merge(download::router())
        .merge(jobs::router())
        .merge(logs::router())
        .merge(files::router())
        .merge(reports::router())
}
