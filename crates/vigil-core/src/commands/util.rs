use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::AppContext;
use crate::cleanup::CleanupContext;
use crate::engine::{EngineRepository, Snapshot};
use crate::error::{Result, VigilError};
use crate::lifecycle::{JobStatus, LogLevel, OperationKind};
use crate::platform::lock_unpoisoned;
use crate::progress::SharedLog;
use crate::repo::RepositoryHandle;
use vigil_types::{JobId, RepoId};

/// Run a blocking engine call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VigilError::Other(format!("blocking task failed: {e}")))?
}

/// Engine log callback that appends to `log`.
pub fn log_sink(log: &SharedLog) -> impl FnMut(LogLevel, String) + Send + 'static {
    let log = Arc::clone(log);
    move |level, text| lock_unpoisoned(&log, "operation_log").append(level, text)
}

/// Run `action` against the repository while holding an exclusive lock.
/// The lock release is always attempted, even when the action fails.
pub async fn with_exclusive_lock<T, F>(
    ctx: &AppContext,
    repo: &RepositoryHandle,
    action: F,
) -> Result<T>
where
    F: FnOnce(Arc<dyn EngineRepository>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let lock = ctx.locks.acquire_exclusive(repo).await?;
    let session = Arc::clone(&repo.session);
    let result = blocking(move || action(session)).await;

    let locks = ctx.locks.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || locks.release(lock)).await {
        warn!(repo_id = repo.id, error = %e, "failed to release repository lock");
    }
    result
}

/// Everything a maintenance job body needs.
pub struct OperationJob {
    pub op_id: JobId,
    pub repo: Arc<RepositoryHandle>,
    pub log: SharedLog,
    pub cancel: CancellationToken,
}

impl OperationJob {
    pub fn append(&self, level: LogLevel, text: impl Into<String>) {
        lock_unpoisoned(&self.log, "operation_log").append(level, text);
    }
}

/// Start a maintenance job under an exclusive lock and return its id.
///
/// Lock acquisition happens before this returns, so a busy repository is
/// reported to the caller directly. The body then runs in the background;
/// its log is streamed to the attached client and stored with the
/// Operation once it ends.
pub async fn start_operation<F, Fut>(
    ctx: &Arc<AppContext>,
    repository_id: RepoId,
    kind: OperationKind,
    policy_id: Option<u64>,
    body: F,
) -> Result<JobId>
where
    F: FnOnce(Arc<AppContext>, OperationJob) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let repo = ctx.registry.get(repository_id)?;
    let cleanup = CleanupContext::new();
    let cancel = ctx.job_scope();
    {
        let cancel = cancel.clone();
        cleanup.add_cleanup("cancel job scope", move || cancel.cancel());
    }

    let lock = match ctx.locks.acquire_exclusive(&repo).await {
        Ok(lock) => lock,
        Err(e) => {
            cleanup.unwind().await;
            return Err(e);
        }
    };
    {
        let locks = ctx.locks.clone();
        cleanup.add_cleanup("release repository lock", move || locks.release(lock));
    }

    let op = match ctx.operations.create(repository_id, kind, policy_id) {
        Ok(op) => op,
        Err(e) => {
            cleanup.unwind().await;
            return Err(e);
        }
    };
    let op_id = op.id;
    let rebind = ctx.operations.live().open(op_id, ());
    {
        let live = Arc::clone(ctx.operations.live());
        cleanup.add_cleanup("close live entry", move || live.close(op_id, "finished"));
    }

    let log = ctx.operation_log(op_id).shared();
    let job = OperationJob {
        op_id,
        repo,
        log: Arc::clone(&log),
        cancel: cancel.clone(),
    };

    let worker_ctx = Arc::clone(ctx);
    ctx.spawn(async move {
        let ctx = worker_ctx;
        if let Err(e) = ctx.operations.set_status(op_id, JobStatus::Running) {
            warn!(op_id, error = %e, "failed to mark operation running");
        }
        info!(op_id, repo_id = repository_id, kind = kind.as_str(), "operation started");

        let replay = spawn_replay(Arc::clone(&log), rebind, cancel.clone());

        let result = body(Arc::clone(&ctx), job).await;

        let (lines, log_errors) = {
            let mut log = lock_unpoisoned(&log, "operation_log");
            if let Err(e) = &result {
                log.append(LogLevel::Error, e.to_string());
            }
            (log.lines().to_vec(), log.has_errors())
        };
        let status = if result.is_err() || log_errors {
            JobStatus::Error
        } else {
            JobStatus::End
        };
        if let Err(e) = ctx.operations.set_logs(op_id, lines) {
            warn!(op_id, error = %e, "failed to store operation log");
        }
        if let Err(e) = ctx.operations.set_status(op_id, status) {
            warn!(op_id, error = %e, "failed to store operation status");
        }
        info!(op_id, kind = kind.as_str(), status = ?status, "operation finished");

        cleanup.unwind().await;
        replay.abort();
    });

    Ok(op_id)
}

/// Replay `log` to every newly attached client until `rebind` closes.
pub(crate) fn spawn_replay(
    log: SharedLog,
    mut rebind: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = rebind.recv() => match signal {
                    Some(()) => lock_unpoisoned(&log, "operation_log").replay(),
                    None => break,
                },
            }
        }
    })
}

/// Find one snapshot by id prefix, or the newest one for `"latest"`.
pub fn resolve_snapshot(snapshots: &[Snapshot], spec: &str) -> Result<Snapshot> {
    let spec = spec.trim();
    if spec == "latest" {
        return snapshots
            .iter()
            .max_by_key(|s| s.time)
            .cloned()
            .ok_or_else(|| VigilError::SnapshotNotFound(spec.into()));
    }
    let mut matches = snapshots.iter().filter(|s| s.id.matches_prefix(spec));
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found.clone()),
        (Some(_), Some(_)) => Err(VigilError::InvalidArgument(format!(
            "snapshot prefix '{spec}' is ambiguous"
        ))),
        (None, _) => Err(VigilError::SnapshotNotFound(spec.into())),
    }
}
