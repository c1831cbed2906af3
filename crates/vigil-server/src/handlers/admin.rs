use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use vigil_core::commands::stats::{StatsReport, repository_stats as compute_stats};
use vigil_core::commands::status::{RepositoryStatus, repositories_with_status};
use vigil_core::engine::LockInfo;
use vigil_types::RepoId;

use crate::error::ServerError;
use crate::state::AppState;

/// GET /health — process liveness plus a few counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.ctx();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.inner.start_time.elapsed().as_secs(),
        "repositories": ctx.registry.len(),
        "running_tasks": ctx.tasks.live().len(),
        "running_operations": ctx.operations.live().len(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeldLock {
    pub repository_id: RepoId,
    #[serde(flatten)]
    pub info: LockInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocksResponse {
    pub heartbeat_running: bool,
    pub locks: Vec<HeldLock>,
}

/// GET /locks — every lock this process currently holds.
pub async fn list_locks(State(state): State<AppState>) -> Json<LocksResponse> {
    let locks = &state.ctx().locks;
    Json(LocksResponse {
        heartbeat_running: locks.heartbeat_running(),
        locks: locks
            .held_locks()
            .into_iter()
            .map(|(repository_id, info)| HeldLock { repository_id, info })
            .collect(),
    })
}

/// GET /repositories — stored repositories with a live probe each.
pub async fn list_repositories(
    State(state): State<AppState>,
) -> Result<Json<Vec<RepositoryStatus>>, ServerError> {
    Ok(Json(repositories_with_status(state.ctx()).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct StatsQuery {
    #[serde(default)]
    pub force: bool,
}

/// GET /stats — cached per-repository statistics; `?force=true` recomputes.
pub async fn repository_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsReport>, ServerError> {
    Ok(Json(compute_stats(state.ctx(), query.force).await?))
}
