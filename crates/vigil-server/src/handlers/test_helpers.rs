use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

use vigil_core::app::{AppContext, Stores};
use vigil_core::config::{RepositoryEntry, VigilConfig};
use vigil_core::engine::{BackendKind, MemoryEngine};

use crate::config::ServerSection;
use crate::state::AppState;

pub const MAIN_URL: &str = "/srv/backup/main";

/// Create a wired-up router over an in-memory engine with one loaded
/// repository.
pub async fn setup_app() -> (Router, AppState, MemoryEngine) {
    let engine = MemoryEngine::with_auto_init();
    let mut config = VigilConfig::default();
    config.repositories = vec![RepositoryEntry {
        name: "main".into(),
        backend: BackendKind::Local,
        url: MAIN_URL.into(),
        password: "correct horse".into(),
        key_id: None,
        secret: None,
        region: None,
    }];
    let ctx = AppContext::new(config, Arc::new(engine.clone()), Stores::in_memory()).unwrap();
    ctx.seed_repositories().unwrap();
    ctx.reload_repositories().await.unwrap();

    let state = AppState::new(ServerSection::default(), ctx);
    let router = super::router(state.clone());
    (router, state, engine)
}

pub async fn get(router: Router, path: &str) -> axum::response::Response {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    router.oneshot(req).await.unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
