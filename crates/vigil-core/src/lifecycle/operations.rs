use std::sync::Arc;

use super::live::LiveRegistry;
use super::model::{JobStatus, LogLine, Operation, OperationField, OperationKind};
use super::store::RecordStore;
use crate::error::Result;
use vigil_types::{JobId, RepoId};

pub type OperationRegistry = LiveRegistry<()>;

/// Raw log streams that have no persisted record (scheduled sweeps).
pub type LogRegistry = LiveRegistry<()>;

#[derive(Clone)]
pub struct OperationService {
    store: Arc<dyn RecordStore<Operation>>,
    live: Arc<OperationRegistry>,
}

impl OperationService {
    pub fn new(store: Arc<dyn RecordStore<Operation>>, live: Arc<OperationRegistry>) -> Self {
        Self { store, live }
    }

    pub fn live(&self) -> &Arc<OperationRegistry> {
        &self.live
    }

    pub fn create(
        &self,
        repository_id: RepoId,
        kind: OperationKind,
        policy_id: Option<u64>,
    ) -> Result<Operation> {
        let mut op = Operation {
            repository_id,
            kind,
            policy_id,
            status: JobStatus::New,
            ..Default::default()
        };
        self.store.create(&mut op)?;
        Ok(op)
    }

    pub fn get(&self, id: JobId) -> Result<Operation> {
        self.store.get(id)
    }

    pub fn set_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.store.update_field(id, OperationField::Status(status))
    }

    pub fn set_logs(&self, id: JobId, logs: Vec<LogLine>) -> Result<()> {
        self.store.update_field(id, OperationField::Logs(logs))
    }

    /// Operations for one repository (or all), newest first.
    pub fn list(&self, repository_id: Option<RepoId>) -> Result<Vec<Operation>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|o| repository_id.is_none_or(|r| o.repository_id == r))
            .collect())
    }
}
