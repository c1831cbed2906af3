use std::sync::Arc;

use tracing::warn;

use super::{blocking, log_sink, start_operation};
use crate::app::AppContext;
use crate::error::{Result, VigilError};
use crate::lifecycle::{LogLevel, OperationKind};
use vigil_types::{JobId, RepoId};

/// Start a repository format migration. The registry is reloaded once the
/// migration ran so handles see the new format.
pub async fn run_migrate(ctx: &Arc<AppContext>, repository_id: RepoId, name: &str, force: bool) -> Result<JobId> {
    let repo = ctx.registry.get(repository_id)?;
    let available = repo.session.migrations();
    if !available.iter().any(|m| m == name) {
        return Err(VigilError::InvalidArgument(format!(
            "unknown migration '{name}' (available: {})",
            available.join(", ")
        )));
    }

    let name = name.to_string();
    start_operation(ctx, repository_id, OperationKind::Migrate, None, move |ctx, job| async move {
        let session = Arc::clone(&job.repo.session);
        let cancel = job.cancel.clone();
        let mut log = log_sink(&job.log);
        let migration = name.clone();
        blocking(move || session.migrate(&migration, force, &cancel, &mut log)).await?;
        job.append(LogLevel::Success, format!("migration {name} finished"));

        let report = ctx.reload_repositories().await?;
        if let Some((_, e)) = report.failed.iter().find(|(id, _)| *id == job.repo.id) {
            warn!(repo_id = job.repo.id, error = %e, "repository failed to reopen after migration");
            job.append(LogLevel::Warning, format!("repository could not be reopened: {e}"));
        }
        Ok(())
    })
    .await
}
