use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::blocking;
use crate::app::AppContext;
use crate::cleanup::CleanupContext;
use crate::engine::{BackupRequest, BackupSummary};
use crate::error::{Result, VigilError};
use crate::lifecycle::{ErrorPhase, JobStatus, SummaryOutput, Task, TaskField, TaskKind, TaskLive};
use crate::platform;
use crate::progress::{TaskReporter, Weights};
use vigil_types::{JobId, RepoId};

const UNREADABLE_SOURCES: &str = "at least one source file could not be read";

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub repository_id: RepoId,
    pub path: String,
    pub plan_id: Option<u64>,
    pub tags: Vec<String>,
    pub excludes: Vec<String>,
    /// Defaults to the local hostname.
    pub host: Option<String>,
    pub dry_run: bool,
}

pub fn summary_output(summary: &BackupSummary, dry_run: bool) -> SummaryOutput {
    SummaryOutput {
        files_new: summary.files_new,
        files_changed: summary.files_changed,
        files_unmodified: summary.files_unmodified,
        dirs_new: summary.dirs_new,
        dirs_changed: summary.dirs_changed,
        dirs_unmodified: summary.dirs_unmodified,
        data_blobs: summary.data_blobs,
        tree_blobs: summary.tree_blobs,
        data_added: summary.data_added,
        total_files_processed: summary.total_files_processed,
        total_bytes_processed: summary.total_bytes_processed,
        total_duration: 0.0,
        snapshot_id: summary.snapshot_id.map(|id| id.to_hex()).unwrap_or_default(),
        dry_run,
    }
}

/// Accept a backup of `options.path` and return the Task id.
///
/// Fails immediately when the path is already being backed up or the
/// repository cannot be locked. Scanning and archiving run in the
/// background.
pub async fn run_backup(ctx: &Arc<AppContext>, options: BackupOptions) -> Result<JobId> {
    if options.path.trim().is_empty() {
        return Err(VigilError::InvalidArgument("please specify a path to back up".into()));
    }
    let repo = ctx.registry.get(options.repository_id)?;
    let repo_id = repo.id;
    let path = options.path.clone();

    let cleanup = CleanupContext::new();
    let cancel = ctx.job_scope();
    {
        let cancel = cancel.clone();
        cleanup.add_cleanup("cancel job scope", move || cancel.cancel());
    }

    let Some(token) = ctx.backup_guard.try_acquire(repo_id, &path) else {
        cleanup.unwind().await;
        return Err(VigilError::BackupRunning { repo_id, path });
    };
    {
        let ctx = Arc::clone(ctx);
        let path = path.clone();
        cleanup.add_cleanup("clear backup flag", move || {
            ctx.backup_guard.release(repo_id, &path, token);
        });
    }

    let lock = match ctx.locks.acquire_shared(&repo).await {
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

    let host = options.host.clone().unwrap_or_else(platform::hostname);
    let targets = vec![path.clone()];
    let parent = {
        let session = Arc::clone(&repo.session);
        let host = host.clone();
        let targets = targets.clone();
        blocking(move || session.find_parent(&host, &targets)).await
    };
    let parent = match parent {
        Ok(parent) => parent,
        Err(e) => {
            cleanup.unwind().await;
            return Err(e);
        }
    };

    let task = Task {
        name: format!("backup_{}_{}", repo.name, Utc::now().format("%Y%m%d%H%M%S")),
        kind: TaskKind::Backup,
        path: path.clone(),
        plan_id: options.plan_id,
        repository_id: repo_id,
        ..Default::default()
    };
    let task = match ctx.tasks.create(task) {
        Ok(task) => task,
        Err(e) => {
            cleanup.unwind().await;
            return Err(e);
        }
    };
    let task_id = task.id;
    if let Some(parent) = &parent {
        if let Err(e) = ctx.tasks.update_field(task_id, TaskField::ParentId(parent.id.to_hex())) {
            warn!(task_id, error = %e, "failed to record parent snapshot");
        }
    }

    let rebind = ctx.tasks.live().open(task_id, TaskLive::default());
    {
        let live = Arc::clone(ctx.tasks.live());
        cleanup.add_cleanup("close live entry", move || live.close(task_id, "finished"));
    }

    let (mut reporter, progress) = TaskReporter::new(
        task_id,
        TaskKind::Backup,
        ctx.tasks.clone(),
        ctx.reporter_settings(Weights::BACKUP),
    );
    let request = BackupRequest {
        targets,
        host,
        tags: options.tags,
        parent: parent.map(|p| p.id),
        excludes: options.excludes,
        dry_run: options.dry_run,
    };
    let dry_run = options.dry_run;
    let session = Arc::clone(&repo.session);
    let worker_ctx = Arc::clone(ctx);

    ctx.spawn(async move {
        let ctx = worker_ctx;
        if let Err(e) = ctx.tasks.set_status(task_id, JobStatus::Running) {
            warn!(task_id, error = %e, "failed to mark task running");
        }
        info!(task_id, repo_id, path = %request.targets.join(", "), "backup started");

        let scan = {
            let session = Arc::clone(&session);
            let targets = request.targets.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            let scanning = blocking({
                let cancel = cancel.clone();
                move || session.scan(&targets, &cancel, &mut |event| progress.scan(event))
            });
            async move {
                let scanned = scanning.await;
                // A scanner that cannot finish aborts the whole job.
                if matches!(&scanned, Err(e) if !matches!(e, VigilError::Cancelled)) {
                    cancel.cancel();
                }
                scanned
            }
        };
        let execute = {
            let cancel = cancel.clone();
            blocking(move || session.backup(&request, &cancel, &mut |event| progress.archive(event)))
        };
        let (scanned, executed, ()) = tokio::join!(scan, execute, reporter.run(&cancel, rebind));

        let outcome = match (scanned, executed) {
            (Err(e), _) if !matches!(e, VigilError::Cancelled) => {
                warn!(task_id, error = %e, "scan failed, backup aborted");
                reporter.scan_failed(&e);
                reporter.fail(&e)
            }
            (_, Ok(summary)) => {
                if reporter.error_count() > 0 {
                    reporter.record_error(ErrorPhase::Backup, "", UNREADABLE_SOURCES.into());
                }
                reporter.finish(summary_output(&summary, dry_run))
            }
            (_, Err(e)) => {
                warn!(task_id, error = %e, "backup failed");
                reporter.fail(&e)
            }
        };
        if let Err(e) = outcome {
            warn!(task_id, error = %e, "failed to settle task");
        }
        cleanup.unwind().await;
    });

    Ok(task_id)
}
