use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::app::{AppContext, Stores};
use crate::config::{RepositoryEntry, VigilConfig};
use crate::engine::{BackendKind, MemoryEngine, Snapshot};
use crate::lifecycle::{Operation, Task};
use vigil_types::RepoId;
use vigil_types::snapshot_id::SnapshotId;

pub const MAIN_URL: &str = "/srv/backup/main";
pub const OTHER_URL: &str = "/srv/backup/other";
pub const PASSWORD: &str = "correct horse";

/// Id the first seeded repository receives.
pub const MAIN_REPO: RepoId = 1;

pub fn repo_entry(name: &str, url: &str) -> RepositoryEntry {
    RepositoryEntry {
        name: name.into(),
        backend: BackendKind::Local,
        url: url.into(),
        password: PASSWORD.into(),
        key_id: None,
        secret: None,
        region: None,
    }
}

/// Default config with fast progress ticks and one repository.
pub fn test_config() -> VigilConfig {
    let mut config = VigilConfig::default();
    config.progress.tick = "20ms".into();
    config.progress.min_update_pause = "0s".into();
    config.repositories = vec![repo_entry("main", MAIN_URL)];
    config
}

pub async fn test_context_with(engine: &MemoryEngine, config: VigilConfig) -> Arc<AppContext> {
    let ctx = AppContext::new(config, Arc::new(engine.clone()), Stores::in_memory()).unwrap();
    ctx.seed_repositories().unwrap();
    ctx.reload_repositories().await.unwrap();
    ctx
}

pub async fn test_context() -> (Arc<AppContext>, MemoryEngine) {
    let engine = MemoryEngine::with_auto_init();
    let ctx = test_context_with(&engine, test_config()).await;
    (ctx, engine)
}

pub fn snapshot(host: &str, path: &str, time: DateTime<Utc>) -> Snapshot {
    Snapshot {
        id: SnapshotId::generate(),
        time,
        hostname: host.into(),
        username: "backup".into(),
        paths: vec![path.into()],
        tags: Vec::new(),
        parent: None,
        total_files: 1,
        total_bytes: 100,
    }
}

/// Poll until the task is settled and its live entry is gone.
pub async fn wait_for_task(ctx: &AppContext, id: u64) -> Task {
    for _ in 0..500 {
        let task = ctx.tasks.get(id).unwrap();
        if task.status.is_terminal() && !ctx.tasks.live().contains(id) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} did not finish");
}

/// Poll until the operation is settled and its live entry is gone.
pub async fn wait_for_operation(ctx: &AppContext, id: u64) -> Operation {
    for _ in 0..500 {
        let op = ctx.operations.get(id).unwrap();
        if op.status.is_terminal() && !ctx.operations.live().contains(id) {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {id} did not finish");
}

/// Poll until no lock of this process is held any more.
pub async fn wait_for_unlocked(ctx: &AppContext) {
    for _ in 0..500 {
        if ctx.locks.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("locks were not released");
}
