use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{blocking, log_sink, start_operation};
use crate::app::AppContext;
use crate::cleanup::CleanupContext;
use crate::engine::{EngineRepository, PruneOptions, PruneReport};
use crate::error::Result;
use crate::lifecycle::{LogLevel, OperationKind};
use crate::platform::lock_unpoisoned;
use crate::progress::{SharedLog, format_bytes};
use vigil_types::{JobId, RepoId};

/// Start a prune of unreferenced data.
pub async fn run_prune(ctx: &Arc<AppContext>, repository_id: RepoId, options: PruneOptions) -> Result<JobId> {
    start_operation(ctx, repository_id, OperationKind::Prune, None, move |_ctx, job| async move {
        prune_session(Arc::clone(&job.repo.session), options, &job.cancel, &job.log).await?;
        Ok(())
    })
    .await
}

/// Prune under an exclusive lock with the configured settings, writing to
/// `log`. No Operation record is created.
pub(crate) async fn run_prune_sync(ctx: &AppContext, repository_id: RepoId, log: &SharedLog) -> Result<PruneReport> {
    let repo = ctx.registry.get(repository_id)?;
    let cleanup = CleanupContext::new();
    let cancel = ctx.job_scope();
    {
        let cancel = cancel.clone();
        cleanup.add_cleanup("cancel job scope", move || cancel.cancel());
    }
    let options = PruneOptions {
        max_unused: ctx.settings.prune_max_unused.clone(),
        dry_run: false,
    };
    let result = match ctx.locks.acquire_exclusive(&repo).await {
        Ok(lock) => {
            let locks = ctx.locks.clone();
            cleanup.add_cleanup("release repository lock", move || locks.release(lock));
            prune_session(Arc::clone(&repo.session), options, &cancel, log).await
        }
        Err(e) => Err(e),
    };
    cleanup.unwind().await;
    result
}

/// Prune a repository the caller already holds an exclusive lock on, then
/// reload its index.
pub(crate) async fn prune_session(
    session: Arc<dyn EngineRepository>,
    options: PruneOptions,
    cancel: &CancellationToken,
    log: &SharedLog,
) -> Result<PruneReport> {
    let dry_run = options.dry_run;
    let cancel = cancel.clone();
    let mut sink = log_sink(log);
    let report = blocking(move || {
        let report = session.prune(&options, &cancel, &mut sink)?;
        if !options.dry_run {
            session.load_index(&cancel)?;
        }
        Ok(report)
    })
    .await?;

    let verb = if dry_run { "would remove" } else { "removed" };
    lock_unpoisoned(log, "operation_log").append(
        LogLevel::Success,
        format!(
            "{verb} {} unused blobs, {} freed",
            report.blobs_removed,
            format_bytes(report.bytes_freed)
        ),
    );
    Ok(report)
}
