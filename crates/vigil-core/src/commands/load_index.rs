use std::sync::Arc;

use tracing::info;

use super::blocking;
use crate::app::AppContext;
use crate::error::Result;
use vigil_types::RepoId;

/// Reload the in-memory index of one repository.
pub async fn run_load_index(ctx: &AppContext, repository_id: RepoId) -> Result<()> {
    let repo = ctx.registry.get(repository_id)?;
    let session = Arc::clone(&repo.session);
    let cancel = repo.scope.clone();
    blocking(move || session.load_index(&cancel)).await?;
    info!(repo_id = repository_id, "index reloaded");
    Ok(())
}

/// Remove stale locks of one repository, or all of them with `remove_all`.
/// Locks held by jobs of this process are not consulted.
pub async fn unlock_repository(ctx: &AppContext, repository_id: RepoId, remove_all: bool) -> Result<usize> {
    let repo = ctx.registry.get(repository_id)?;
    let session = Arc::clone(&repo.session);
    let removed = blocking(move || session.remove_locks(remove_all)).await?;
    info!(repo_id = repository_id, removed, remove_all, "repository locks removed");
    Ok(removed)
}
