use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::{blocking, resolve_snapshot};
use crate::app::AppContext;
use crate::cleanup::CleanupContext;
use crate::engine::{RestoreRequest, RestoreSummary};
use crate::error::{Result, VigilError};
use crate::lifecycle::{
    ErrorPhase, JobStatus, StatusUpdate, SummaryOutput, Task, TaskKind, TaskLive,
};
use crate::progress::{TaskReporter, Weights};
use vigil_types::{JobId, RepoId};

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub repository_id: RepoId,
    /// Snapshot id, id prefix or `latest`.
    pub snapshot_id: String,
    pub target: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub verify: bool,
}

impl RestoreOptions {
    fn validate(&self) -> Result<()> {
        if self.snapshot_id.trim().is_empty() {
            return Err(VigilError::InvalidArgument("please specify a snapshot to restore".into()));
        }
        if self.target.trim().is_empty() {
            return Err(VigilError::InvalidArgument("please specify a target directory".into()));
        }
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(VigilError::InvalidArgument(
                "exclude and include patterns are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

fn restore_summary(summary: &RestoreSummary, snapshot_id: &str) -> SummaryOutput {
    SummaryOutput {
        total_files_processed: summary.files_restored,
        total_bytes_processed: summary.bytes_restored,
        snapshot_id: snapshot_id.to_string(),
        ..Default::default()
    }
}

/// Accept a restore of one snapshot into `options.target` and return the
/// Task id.
pub async fn run_restore(ctx: &Arc<AppContext>, options: RestoreOptions) -> Result<JobId> {
    options.validate()?;
    let repo = ctx.registry.get(options.repository_id)?;
    let repo_id = repo.id;

    let snapshot = {
        let session = Arc::clone(&repo.session);
        let spec = options.snapshot_id.clone();
        blocking(move || resolve_snapshot(&session.list_snapshots()?, &spec)).await?
    };

    let cleanup = CleanupContext::new();
    let cancel = ctx.job_scope();
    {
        let cancel = cancel.clone();
        cleanup.add_cleanup("cancel job scope", move || cancel.cancel());
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

    let task = Task {
        name: format!("restore_{}_{}", repo.name, Utc::now().format("%Y%m%d%H%M%S")),
        kind: TaskKind::Restore,
        path: options.target.clone(),
        repository_id: repo_id,
        parent_id: Some(snapshot.id.to_hex()),
        progress: Some(StatusUpdate::default()),
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

    let rebind = ctx.tasks.live().open(task_id, TaskLive::default());
    {
        let live = Arc::clone(ctx.tasks.live());
        cleanup.add_cleanup("close live entry", move || live.close(task_id, "finished"));
    }

    let (mut reporter, progress) = TaskReporter::new(
        task_id,
        TaskKind::Restore,
        ctx.tasks.clone(),
        ctx.reporter_settings(Weights::RESTORE),
    );
    let request = RestoreRequest {
        snapshot: Some(snapshot.id),
        target: options.target.clone(),
        include: options.include,
        exclude: options.exclude,
        verify: options.verify,
    };
    let session = Arc::clone(&repo.session);
    let snapshot_hex = snapshot.id.to_hex();
    let worker_ctx = Arc::clone(ctx);

    ctx.spawn(async move {
        let ctx = worker_ctx;
        if let Err(e) = ctx.tasks.set_status(task_id, JobStatus::Running) {
            warn!(task_id, error = %e, "failed to mark task running");
        }
        info!(task_id, repo_id, snapshot = %snapshot.id, target = %request.target, "restore started");

        let verify = request.verify;
        let target = request.target.clone();
        let execute = {
            let cancel = cancel.clone();
            blocking(move || session.restore(&request, &cancel, &mut |event| progress.restore(event)))
        };
        let (executed, ()) = tokio::join!(execute, reporter.run(&cancel, rebind));

        let outcome = match executed {
            Ok(summary) => {
                if verify {
                    let verified = summary.verified_files.unwrap_or(0);
                    if verified != summary.files_restored {
                        reporter.record_error(
                            ErrorPhase::Restore,
                            &target,
                            format!(
                                "verification failed: {verified} of {} restored files match",
                                summary.files_restored
                            ),
                        );
                    }
                }
                reporter.finish(restore_summary(&summary, &snapshot_hex))
            }
            Err(e) => {
                warn!(task_id, error = %e, "restore failed");
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
