use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/logs/{job_id}", get(handlers::logs::get_job_logs))
}
