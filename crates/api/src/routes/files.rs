use axum::routing::{get, post};
use axum::Router;

use crate::handlers::files;
use crate::state::AppState;

/// Download file routes.
///
/// ```text
/// GET    /files/{job_id}               list_files
/// DELETE /files/{job_id}               delete_job_files
/// POST   /files/{job_id}/delete        delete_files
/// GET    /files/{job_id}/{filename}    download_file
/// DELETE /files/{job_id}/{filename}    delete_file
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/files/{job_id}",
            get(files::list_files).delete(files::delete_job_files),
        )
        .route("/files/{job_id}/delete", post(files::delete_files))
        .route(
            "/files/{job_id}/{filename}",
            get(files::download_file).delete(files::delete_file),
        )
}
