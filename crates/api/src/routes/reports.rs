use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/config/reports",
        get(handlers::reports::get_reports_config).post(handlers::reports::update_reports_config),
    )
}
