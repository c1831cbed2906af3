use std::sync::Arc;

use tracing::{info, warn};

use super::{OperationJob, blocking, log_sink, start_operation};
use crate::app::AppContext;
use crate::engine::CheckOptions;
use crate::error::{Result, VigilError};
use crate::lifecycle::{LogLevel, OperationKind};
use crate::platform::lock_unpoisoned;
use vigil_types::{JobId, RepoId};

/// Start an integrity check of one repository.
pub async fn run_check(ctx: &Arc<AppContext>, repository_id: RepoId, options: CheckOptions) -> Result<JobId> {
    start_operation(ctx, repository_id, OperationKind::Check, None, move |_ctx, job| {
        check_body(job, options)
    })
    .await
}

async fn check_body(job: OperationJob, options: CheckOptions) -> Result<()> {
    let report = {
        let session = Arc::clone(&job.repo.session);
        let cancel = job.cancel.clone();
        let mut log = log_sink(&job.log);
        blocking(move || session.check(&options, &cancel, &mut log)).await?
    };

    let mut log = lock_unpoisoned(&job.log, "operation_log");
    log.reset_limit();
    for error in &report.errors {
        log.append_limited(LogLevel::Error, error.clone());
    }
    if report.errors.is_empty() {
        log.append(
            LogLevel::Success,
            format!("no errors were found ({} snapshots checked)", report.snapshots_checked),
        );
        Ok(())
    } else {
        Err(VigilError::Engine(format!(
            "check found {} error(s) in repository {}",
            report.errors.len(),
            job.repo.name
        )))
    }
}

/// Start a check on every loaded repository. Repositories that cannot be
/// locked right now are skipped with a warning.
pub async fn run_check_all(ctx: &Arc<AppContext>) -> Vec<(RepoId, Result<JobId>)> {
    let mut started = Vec::new();
    for handle in ctx.registry.handles() {
        let result = run_check(ctx, handle.id, CheckOptions::default()).await;
        match &result {
            Ok(op_id) => info!(repo_id = handle.id, op_id, "scheduled check started"),
            Err(e) => warn!(repo_id = handle.id, error = %e, "scheduled check skipped"),
        }
        started.push((handle.id, result));
    }
    started
}
