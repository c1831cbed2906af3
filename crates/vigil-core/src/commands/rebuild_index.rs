use std::sync::Arc;

use super::{blocking, log_sink, start_operation};
use crate::app::AppContext;
use crate::error::Result;
use crate::lifecycle::{LogLevel, OperationKind};
use vigil_types::{JobId, RepoId};

/// Start an index rebuild. With `read_all_packs` every pack is re-read
/// instead of trusting pack headers.
pub async fn run_rebuild_index(ctx: &Arc<AppContext>, repository_id: RepoId, read_all_packs: bool) -> Result<JobId> {
    start_operation(ctx, repository_id, OperationKind::RebuildIndex, None, move |_ctx, job| async move {
        let session = Arc::clone(&job.repo.session);
        let cancel = job.cancel.clone();
        let mut log = log_sink(&job.log);
        blocking(move || {
            session.rebuild_index(read_all_packs, &cancel, &mut log)?;
            session.load_index(&cancel)
        })
        .await?;
        job.append(LogLevel::Success, "index rebuilt");
        Ok(())
    })
    .await
}
