pub mod admin;
pub mod ws;

#[cfg(test)]
mod test_helpers;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/locks", get(admin::list_locks))
        .route("/repositories", get(admin::list_repositories))
        .route("/stats", get(admin::repository_stats))
        // Live streams: the first text frame names the job.
        .route("/ws/tasks", get(ws::tasks))
        .route("/ws/operations", get(ws::operations))
        .route("/ws/logs", get(ws::logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
