use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use super::blocking;
use crate::engine::EngineRepository;
use crate::error::{Result, VigilError};
use crate::lifecycle::LogLevel;
use crate::platform::lock_unpoisoned;
use crate::progress::SharedLog;
use vigil_types::snapshot_id::SnapshotId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub removed: Vec<SnapshotId>,
    pub failed: Vec<(SnapshotId, String)>,
}

/// Remove `ids` with at most `workers` removals in flight.
///
/// Failures are logged (limited) and skipped. With `checked` the first
/// failure aborts the batch instead; removals already in flight still
/// complete.
pub async fn delete_snapshots(
    session: Arc<dyn EngineRepository>,
    ids: Vec<SnapshotId>,
    workers: usize,
    checked: bool,
    cancel: &CancellationToken,
    log: &SharedLog,
) -> Result<DeleteReport> {
    let total = ids.len();
    let mut report = DeleteReport::default();
    lock_unpoisoned(log, "operation_log").reset_limit();

    let mut pending = stream::iter(ids)
        .map(|id| {
            let session = Arc::clone(&session);
            async move {
                let result = blocking(move || session.remove_snapshot(&id)).await;
                (id, result)
            }
        })
        .buffer_unordered(workers.max(1));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(VigilError::Cancelled),
            next = pending.next() => next,
        };
        let Some((id, result)) = next else { break };
        match result {
            Ok(()) => report.removed.push(id),
            Err(e) if checked => {
                let message = format!("unable to remove {id}: {e}");
                lock_unpoisoned(log, "operation_log").append(LogLevel::Error, message.clone());
                return Err(VigilError::Engine(message));
            }
            Err(e) => {
                lock_unpoisoned(log, "operation_log")
                    .append_limited(LogLevel::Error, format!("unable to remove {id}: {e}"));
                report.failed.push((id, e.to_string()));
            }
        }
        let done = report.removed.len() + report.failed.len();
        lock_unpoisoned(log, "operation_log").progress(format!("{done}/{total} snapshots removed"));
    }
    Ok(report)
}
