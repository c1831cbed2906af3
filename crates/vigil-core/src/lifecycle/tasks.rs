use std::sync::Arc;

use tracing::{info, warn};

use super::live::LiveRegistry;
use super::model::{ErrorPhase, ErrorUpdate, JobStatus, StatusUpdate, Task, TaskField, TaskKind};
use super::store::RecordStore;
use crate::error::Result;
use vigil_types::{JobId, RepoId};

/// Live state carried next to a running Task.
#[derive(Debug, Clone, Default)]
pub struct TaskLive {
    /// Most recent status computed by the progress loop.
    pub progress: Option<StatusUpdate>,
}

pub type TaskRegistry = LiveRegistry<TaskLive>;

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub repository_id: Option<RepoId>,
    pub status: Option<JobStatus>,
    pub kind: Option<TaskKind>,
    pub limit: Option<usize>,
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Running tasks with no live entry and no summary, now Error.
    pub interrupted: Vec<JobId>,
    /// Tasks that had a summary, now End.
    pub completed: Vec<JobId>,
}

const UNKNOWN_STATE: &str = "task state unknown: the process stopped before it finished";

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn RecordStore<Task>>,
    live: Arc<TaskRegistry>,
}

impl TaskService {
    pub fn new(store: Arc<dyn RecordStore<Task>>, live: Arc<TaskRegistry>) -> Self {
        Self { store, live }
    }

    pub fn live(&self) -> &Arc<TaskRegistry> {
        &self.live
    }

    pub fn create(&self, mut task: Task) -> Result<Task> {
        task.status = JobStatus::New;
        self.store.create(&mut task)?;
        Ok(task)
    }

    pub fn get(&self, id: JobId) -> Result<Task> {
        self.store.get(id)
    }

    pub fn update(&self, task: &Task) -> Result<()> {
        self.store.update(task)
    }

    pub fn update_field(&self, id: JobId, field: TaskField) -> Result<()> {
        self.store.update_field(id, field)
    }

    pub fn set_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.store.update_field(id, TaskField::Status(status))
    }

    /// Matching tasks, newest first. Running tasks carry the live progress
    /// snapshot when one exists.
    pub fn search(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut out: Vec<Task> = self
            .store
            .list()?
            .into_iter()
            .filter(|t| filter.repository_id.is_none_or(|r| t.repository_id == r))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.kind.is_none_or(|k| t.kind == k))
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        for task in out.iter_mut().filter(|t| t.status == JobStatus::Running) {
            if let Some(Some(progress)) = self.live.with_state(task.id, |s| s.progress.clone()) {
                task.progress = Some(progress);
            }
        }
        Ok(out)
    }

    /// Correct task records left inconsistent by a crash.
    ///
    /// A Running task with neither a live entry nor a summary was
    /// interrupted and becomes Error. A task holding a summary finished its
    /// work and becomes End.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for task in self.store.list()? {
            match task.status {
                JobStatus::Running if task.summary.is_some() => {
                    self.set_status(task.id, JobStatus::End)?;
                    report.completed.push(task.id);
                }
                JobStatus::Running if !self.live.contains(task.id) => {
                    // The listing may be stale: the job can settle between the
                    // scan and here.
                    let mut current = self.store.get(task.id)?;
                    if current.status != JobStatus::Running
                        || current.summary.is_some()
                        || self.live.contains(task.id)
                    {
                        continue;
                    }
                    current.archival_errors.push(ErrorUpdate {
                        error: UNKNOWN_STATE.into(),
                        during: match current.kind {
                            TaskKind::Backup => ErrorPhase::Backup,
                            TaskKind::Restore => ErrorPhase::Restore,
                        },
                        item: current.path.clone(),
                    });
                    current.status = JobStatus::Error;
                    self.store.update(&current)?;
                    warn!(task_id = task.id, "running task has no live entry, marking as failed");
                    report.interrupted.push(task.id);
                }
                JobStatus::Error if task.summary.is_some() => {
                    self.set_status(task.id, JobStatus::End)?;
                    report.completed.push(task.id);
                }
                _ => {}
            }
        }
        if !report.interrupted.is_empty() || !report.completed.is_empty() {
            info!(
                interrupted = report.interrupted.len(),
                completed = report.completed.len(),
                "task reconciliation rewrote records"
            );
        }
        Ok(report)
    }
}
