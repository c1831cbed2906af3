//! Process-wide map of opened repositories.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::RepositoryRecord;
use crate::config::DataConfig;
use crate::engine::{ConnectionOptions, EngineRepository, RepositoryEngine};
use crate::error::{Result, VigilError};
use crate::platform::{read_unpoisoned, write_unpoisoned};
use vigil_types::RepoId;

/// An opened, authenticated repository with a loaded index.
pub struct RepositoryHandle {
    pub id: RepoId,
    pub name: String,
    pub session: Arc<dyn EngineRepository>,
    /// Cancelled when a reload supersedes this handle or on shutdown.
    pub scope: CancellationToken,
    pub options: ConnectionOptions,
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("location", &self.options.location)
            .finish()
    }
}

type HandleMap = HashMap<RepoId, Arc<RepositoryHandle>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: Vec<RepoId>,
    pub failed: Vec<(RepoId, String)>,
}

pub struct RepositoryRegistry {
    current: RwLock<Arc<HandleMap>>,
    reload_lock: tokio::sync::Mutex<()>,
    root: CancellationToken,
}

impl RepositoryRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
            reload_lock: tokio::sync::Mutex::new(()),
            root,
        }
    }

    /// Open every repository in `records` and replace the current mapping.
    ///
    /// The new map is assembled completely before the swap; readers see
    /// either the old mapping or the new one. Repositories that fail to open
    /// or load their index are logged and left out. Concurrent reloads run
    /// one after another.
    pub async fn reload(
        &self,
        engine: Arc<dyn RepositoryEngine>,
        records: Vec<RepositoryRecord>,
        data: &DataConfig,
    ) -> ReloadReport {
        let _serial = self.reload_lock.lock().await;
        let mut report = ReloadReport::default();
        let mut next: HandleMap = HashMap::with_capacity(records.len());

        for record in records {
            let options = ConnectionOptions::resolve(&record, data);
            let scope = self.root.child_token();
            let opened = {
                let engine = Arc::clone(&engine);
                let options = options.clone();
                let scope = scope.clone();
                tokio::task::spawn_blocking(move || -> Result<Arc<dyn EngineRepository>> {
                    let session = engine.open(&options)?;
                    session.load_index(&scope)?;
                    Ok(session)
                })
                .await
                .map_err(|e| VigilError::Other(format!("open task failed: {e}")))
                .and_then(|r| r)
            };

            match opened {
                Ok(session) => {
                    report.loaded.push(record.id);
                    next.insert(
                        record.id,
                        Arc::new(RepositoryHandle {
                            id: record.id,
                            name: record.name,
                            session,
                            scope,
                            options,
                        }),
                    );
                }
                Err(e) => {
                    warn!(repo_id = record.id, name = %record.name, error = %e, "skipping repository");
                    scope.cancel();
                    report.failed.push((record.id, e.to_string()));
                }
            }
        }

        let previous = {
            let mut current = write_unpoisoned(&self.current, "repository_registry");
            std::mem::replace(&mut *current, Arc::new(next))
        };
        for handle in previous.values() {
            handle.scope.cancel();
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "repository registry reloaded"
        );
        report
    }

    pub fn get(&self, id: RepoId) -> Result<Arc<RepositoryHandle>> {
        if id == 0 {
            return Err(VigilError::InvalidArgument(
                "repository id must be positive".into(),
            ));
        }
        read_unpoisoned(&self.current, "repository_registry")
            .get(&id)
            .cloned()
            .ok_or(VigilError::RepoNotFound(id))
    }

    /// All handles, ordered by id.
    pub fn handles(&self) -> Vec<Arc<RepositoryHandle>> {
        let map = self.mapping();
        let mut handles: Vec<_> = map.values().cloned().collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    /// The current complete mapping.
    pub fn mapping(&self) -> Arc<HandleMap> {
        Arc::clone(&read_unpoisoned(&self.current, "repository_registry"))
    }

    pub fn len(&self) -> usize {
        self.mapping().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every handle and cancel its scope.
    pub fn shutdown(&self) {
        let previous = {
            let mut current = write_unpoisoned(&self.current, "repository_registry");
            std::mem::take(&mut *current)
        };
        for handle in previous.values() {
            handle.scope.cancel();
        }
    }
}
