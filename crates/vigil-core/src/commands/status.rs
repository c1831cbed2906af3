use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;

use super::blocking;
use crate::app::AppContext;
use crate::engine::ConnectionOptions;
use crate::error::Result;
use crate::repo::RepositoryRecord;
use vigil_types::RepoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryState {
    Ok,
    Error,
}

/// One stored repository with the outcome of a live probe. Secrets are
/// masked.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStatus {
    pub id: RepoId,
    pub name: String,
    pub options: ConnectionOptions,
    pub state: RepositoryState,
    pub message: Option<String>,
    pub version: Option<u32>,
    /// Present in the registry.
    pub loaded: bool,
}

/// Probe every stored repository by opening it, `status.check_workers` at a
/// time. Sorted by id, newest first.
pub async fn repositories_with_status(ctx: &AppContext) -> Result<Vec<RepositoryStatus>> {
    let records = ctx.repositories.list()?;
    let mut statuses: Vec<RepositoryStatus> = stream::iter(records)
        .map(|record| probe(ctx, record))
        .buffer_unordered(ctx.settings.check_workers.max(1))
        .collect()
        .await;
    statuses.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(statuses)
}

async fn probe(ctx: &AppContext, record: RepositoryRecord) -> RepositoryStatus {
    let options = ConnectionOptions::resolve(&record, &ctx.config.data);
    let engine = Arc::clone(&ctx.engine);
    let opened = {
        let options = options.clone();
        blocking(move || engine.open(&options).map(|session| session.config())).await
    };
    let (state, message, version) = match opened {
        Ok(config) => (RepositoryState::Ok, None, Some(config.version)),
        Err(e) => (RepositoryState::Error, Some(e.to_string()), None),
    };
    RepositoryStatus {
        id: record.id,
        name: record.name,
        options: options.masked(),
        state,
        message,
        version,
        loaded: ctx.registry.get(record.id).is_ok(),
    }
}
