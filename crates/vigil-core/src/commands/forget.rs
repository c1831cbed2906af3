use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::delete::delete_snapshots;
use super::prune::prune_session;
use super::{blocking, resolve_snapshot, start_operation};
use crate::app::AppContext;
use crate::cleanup::CleanupContext;
use crate::engine::PruneOptions;
use crate::error::{Result, VigilError};
use crate::lifecycle::{LogLevel, OperationKind};
use crate::platform::lock_unpoisoned;
use crate::progress::SharedLog;
use crate::repo::RepositoryHandle;
use crate::retention::{Decision, ExpirePolicy, GroupBy, SnapshotFilter, apply_policy, group_snapshots};
use vigil_types::snapshot_id::SnapshotId;
use vigil_types::{JobId, RepoId};

#[derive(Debug, Clone, Default)]
pub struct ForgetOptions {
    pub policy: ExpirePolicy,
    pub filter: SnapshotFilter,
    pub group_by: GroupBy,
    /// Remove exactly these snapshots (id or prefix) instead of applying
    /// `policy`.
    pub snapshot_ids: Vec<String>,
    /// Prune afterwards when anything was removed.
    pub prune: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForgetReport {
    pub kept: usize,
    pub removed: Vec<SnapshotId>,
    pub failed: Vec<(SnapshotId, String)>,
    pub pruned: bool,
}

/// Start a forget run as a tracked Operation.
pub async fn run_forget(ctx: &Arc<AppContext>, repository_id: RepoId, options: ForgetOptions) -> Result<JobId> {
    start_forget(ctx, repository_id, options, None).await
}

pub(crate) async fn start_forget(
    ctx: &Arc<AppContext>,
    repository_id: RepoId,
    options: ForgetOptions,
    policy_id: Option<u64>,
) -> Result<JobId> {
    start_operation(ctx, repository_id, OperationKind::Forget, policy_id, move |ctx, job| async move {
        forget(&ctx, &job.repo, &options, &job.log, &job.cancel).await?;
        Ok(())
    })
    .await
}

/// Forget under an exclusive lock, writing to `log`, and wait for the
/// result. No Operation record is created.
pub async fn run_forget_sync(
    ctx: &AppContext,
    repository_id: RepoId,
    options: &ForgetOptions,
    log: &SharedLog,
) -> Result<ForgetReport> {
    let repo = ctx.registry.get(repository_id)?;
    let cleanup = CleanupContext::new();
    let cancel = ctx.job_scope();
    {
        let cancel = cancel.clone();
        cleanup.add_cleanup("cancel job scope", move || cancel.cancel());
    }
    let result = match ctx.locks.acquire_exclusive(&repo).await {
        Ok(lock) => {
            let locks = ctx.locks.clone();
            cleanup.add_cleanup("release repository lock", move || locks.release(lock));
            forget(ctx, &repo, options, log, &cancel).await
        }
        Err(e) => Err(e),
    };
    cleanup.unwind().await;
    result
}

fn append(log: &SharedLog, level: LogLevel, text: impl Into<String>) {
    lock_unpoisoned(log, "operation_log").append(level, text);
}

pub(crate) async fn forget(
    ctx: &AppContext,
    repo: &RepositoryHandle,
    options: &ForgetOptions,
    log: &SharedLog,
    cancel: &CancellationToken,
) -> Result<ForgetReport> {
    let snapshots = {
        let session = Arc::clone(&repo.session);
        blocking(move || session.list_snapshots()).await?
    };
    let mut report = ForgetReport::default();

    let (remove, checked) = if !options.snapshot_ids.is_empty() {
        let ids = options
            .snapshot_ids
            .iter()
            .map(|spec| resolve_snapshot(&snapshots, spec).map(|s| s.id))
            .collect::<Result<Vec<_>>>()?;
        (ids, false)
    } else {
        if options.policy.is_empty() {
            append(log, LogLevel::Warning, "no policy was specified, no snapshots will be removed");
            return Ok(report);
        }
        let candidates: Vec<_> = snapshots
            .into_iter()
            .filter(|s| options.filter.matches(s))
            .collect();
        if candidates.is_empty() {
            return Err(VigilError::SnapshotNotFound(
                "no snapshot matches the given filter".into(),
            ));
        }

        let now = Utc::now();
        let mut remove = Vec::new();
        for (key, group) in group_snapshots(candidates, options.group_by) {
            let entries = apply_policy(&group, &options.policy, now);
            let kept = entries.iter().filter(|e| e.is_kept()).count();
            append(
                log,
                LogLevel::Info,
                format!("snapshots for {key}: keep {kept}, remove {}", entries.len() - kept),
            );
            for entry in entries {
                match entry.decision {
                    Decision::Keep { reasons } => {
                        report.kept += 1;
                        append(
                            log,
                            LogLevel::Info,
                            format!("keep {} ({})", entry.snapshot.id, reasons.join(", ")),
                        );
                    }
                    Decision::Remove => {
                        append(log, LogLevel::Info, format!("remove {}", entry.snapshot.id));
                        remove.push(entry.snapshot.id);
                    }
                }
            }
        }
        (remove, true)
    };

    if remove.is_empty() {
        append(log, LogLevel::Info, "no snapshots were removed");
        return Ok(report);
    }
    if options.dry_run {
        append(
            log,
            LogLevel::Info,
            format!("dry run: {} snapshots would be removed", remove.len()),
        );
        return Ok(report);
    }

    let deleted = delete_snapshots(
        Arc::clone(&repo.session),
        remove,
        ctx.settings.delete_workers,
        checked,
        cancel,
        log,
    )
    .await?;
    report.removed = deleted.removed;
    report.failed = deleted.failed;
    append(
        log,
        LogLevel::Success,
        format!("{} snapshots have been removed", report.removed.len()),
    );
    info!(repo_id = repo.id, removed = report.removed.len(), failed = report.failed.len(), "forget finished");

    if options.prune && !report.removed.is_empty() {
        let prune = PruneOptions {
            max_unused: ctx.settings.prune_max_unused.clone(),
            dry_run: false,
        };
        prune_session(Arc::clone(&repo.session), prune, cancel, log).await?;
        report.pruned = true;
    }
    Ok(report)
}
