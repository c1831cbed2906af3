//! The repository engine seam.
//!
//! The control plane never touches pack files, indexes or object storage
//! itself. Everything below this trait boundary (chunking, deduplication,
//! encryption, backend adapters) belongs to the engine, which is consumed
//! as an already-correct blocking library. All calls are made from
//! `spawn_blocking`.

pub mod memory;
mod options;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::lifecycle::LogLevel;
use vigil_types::snapshot_id::SnapshotId;

pub use self::memory::MemoryEngine;
pub use self::options::{BackendKind, ConnectionOptions};

/// Sink for human-readable engine output during maintenance jobs.
pub type LogFn<'a> = &'a mut (dyn FnMut(LogLevel, String) + Send);

pub trait RepositoryEngine: Send + Sync {
    /// Open and authenticate an existing repository.
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn EngineRepository>>;

    /// Create a new repository at the configured location.
    fn init(&self, options: &ConnectionOptions) -> Result<Arc<dyn EngineRepository>>;
}

pub trait EngineRepository: Send + Sync {
    fn config(&self) -> RepoConfigInfo;

    fn load_index(&self, cancel: &CancellationToken) -> Result<()>;

    fn rebuild_index(&self, read_all_packs: bool, cancel: &CancellationToken, log: LogFn<'_>)
        -> Result<()>;

    /// Acquire an advisory lock. A conflicting lock yields `VigilError::Locked`.
    fn lock(&self, exclusive: bool) -> Result<Arc<dyn EngineLock>>;

    /// Remove stale locks, or every lock when `all` is set. Returns the count removed.
    fn remove_locks(&self, all: bool) -> Result<usize>;

    fn list_snapshots(&self) -> Result<Vec<Snapshot>>;

    fn remove_snapshot(&self, id: &SnapshotId) -> Result<()>;

    fn scan(
        &self,
        targets: &[String],
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(ScanEvent) + Send),
    ) -> Result<()>;

    fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(ArchiveEvent) + Send),
    ) -> Result<BackupSummary>;

    fn restore(
        &self,
        request: &RestoreRequest,
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(RestoreEvent) + Send),
    ) -> Result<RestoreSummary>;

    fn check(&self, options: &CheckOptions, cancel: &CancellationToken, log: LogFn<'_>)
        -> Result<CheckReport>;

    fn prune(&self, options: &PruneOptions, cancel: &CancellationToken, log: LogFn<'_>)
        -> Result<PruneReport>;

    /// Names of the migrations this repository can apply.
    fn migrations(&self) -> Vec<String>;

    fn migrate(&self, name: &str, force: bool, cancel: &CancellationToken, log: LogFn<'_>)
        -> Result<()>;

    fn stats(&self) -> Result<RepoStats>;

    /// Most recent snapshot with the same host and path set.
    fn find_parent(&self, host: &str, paths: &[String]) -> Result<Option<Snapshot>> {
        let mut wanted: Vec<&String> = paths.iter().collect();
        wanted.sort();
        let parent = self
            .list_snapshots()?
            .into_iter()
            .filter(|s| {
                let mut have: Vec<&String> = s.paths.iter().collect();
                have.sort();
                s.hostname == host && have == wanted
            })
            .max_by_key(|s| s.time);
        Ok(parent)
    }
}

pub trait EngineLock: Send + Sync {
    fn info(&self) -> LockInfo;

    /// Re-validate the lock so other processes do not consider it stale.
    fn refresh(&self) -> Result<()>;

    fn unlock(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfigInfo {
    pub id: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub time: DateTime<Utc>,
    pub exclusive: bool,
    pub hostname: String,
    pub username: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent: Option<SnapshotId>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub targets: Vec<String>,
    pub host: String,
    pub tags: Vec<String>,
    pub parent: Option<SnapshotId>,
    pub excludes: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Progress { files: u64, bytes: u64 },
    Error { item: String, message: String },
    Finished { files: u64, bytes: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    New,
    Unchanged,
    Modified,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEvent {
    Started { item: String },
    /// Running processed totals.
    Processed { files: u64, bytes: u64 },
    ItemCompleted {
        item: String,
        action: ItemAction,
        data_size: u64,
        metadata_size: u64,
        duration: Duration,
    },
    Error { item: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
    pub data_blobs: u64,
    pub tree_blobs: u64,
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
    pub snapshot_id: Option<SnapshotId>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub snapshot: Option<SnapshotId>,
    pub target: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreEvent {
    Totals { files: u64, bytes: u64 },
    Processed { files: u64, bytes: u64 },
    Error { item: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub files_restored: u64,
    pub bytes_restored: u64,
    pub verified_files: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub read_data: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub snapshots_checked: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Tolerated unused space, e.g. "5%" or "unlimited".
    pub max_unused: String,
    pub dry_run: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            max_unused: "5%".into(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub blobs_removed: u64,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStats {
    pub snapshots: usize,
    pub latest_snapshot: Option<DateTime<Utc>>,
    pub total_files: u64,
    pub total_size: u64,
    pub raw_data_size: u64,
}
