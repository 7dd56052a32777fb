use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Job status routes.
///
/// ```text
/// GET  /jobs                    list_jobs
/// GET  /jobs/{job_id}           get_job
/// GET  /jobs/{job_id}/result    get_job_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{job_id}", get(handlers::jobs::get_job))
        .route("/jobs/{job_id}/result", get(handlers::jobs::get_job_result))
}
