use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::Record;
use crate::engine::ItemAction;
use vigil_types::RepoId;

/// Lifecycle state shared by Tasks and Operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    New,
    Running,
    End,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::End | JobStatus::Error)
    }
}

// ── Client messages ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub seconds_elapsed: u64,
    pub seconds_remaining: u64,
    pub percent_done: f64,
    pub total_files: u64,
    pub files_done: u64,
    pub total_bytes: u64,
    pub bytes_done: u64,
    pub error_count: u64,
    pub current_files: Vec<String>,
    /// Bytes per second since the job started.
    pub avg_speed: u64,
}

/// Phase an item error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    Scan,
    Archival,
    Restore,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorUpdate {
    pub error: String,
    pub during: ErrorPhase,
    pub item: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerboseAction {
    New,
    Unchanged,
    Modified,
    ScanFinished,
}

impl From<ItemAction> for VerboseAction {
    fn from(action: ItemAction) -> Self {
        match action {
            ItemAction::New => VerboseAction::New,
            ItemAction::Unchanged => VerboseAction::Unchanged,
            ItemAction::Modified => VerboseAction::Modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseUpdate {
    pub action: VerboseAction,
    pub item: String,
    /// Seconds.
    pub duration: f64,
    pub data_size: u64,
    pub metadata_size: u64,
    pub total_files: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryOutput {
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
    /// Seconds.
    pub total_duration: f64,
    pub snapshot_id: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
    pub time: DateTime<Utc>,
    /// The line replaces the previous one (progress counters).
    #[serde(default)]
    pub clear: bool,
}

/// Everything sent over a live stream, tagged by `messageType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "snake_case")]
pub enum ClientMessage {
    Status(StatusUpdate),
    Error(ErrorUpdate),
    #[serde(rename = "verbose_status")]
    Verbose(VerboseUpdate),
    Summary(SummaryOutput),
    Log(LogLine),
}

impl ClientMessage {
    pub fn is_summary(&self) -> bool {
        matches!(self, ClientMessage::Summary(_))
    }
}

// ── Task ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Backup,
    Restore,
}

/// A tracked backup or restore job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub kind: TaskKind,
    pub path: String,
    pub plan_id: Option<u64>,
    pub repository_id: RepoId,
    pub status: JobStatus,
    pub parent_id: Option<String>,
    /// Final scan figures.
    pub scanner: Option<VerboseUpdate>,
    pub scanner_error: Option<ErrorUpdate>,
    #[serde(default)]
    pub archival_errors: Vec<ErrorUpdate>,
    #[serde(default)]
    pub restore_errors: Vec<ErrorUpdate>,
    pub summary: Option<SummaryOutput>,
    pub progress: Option<StatusUpdate>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn has_errors(&self) -> bool {
        self.scanner_error.is_some()
            || !self.archival_errors.is_empty()
            || !self.restore_errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum TaskField {
    Status(JobStatus),
    ParentId(String),
    Scanner(VerboseUpdate),
    ScannerError(ErrorUpdate),
    ArchivalErrors(Vec<ErrorUpdate>),
    RestoreErrors(Vec<ErrorUpdate>),
    Summary(SummaryOutput),
    Progress(StatusUpdate),
}

impl Record for Task {
    type Field = TaskField;
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn touch(&mut self, now: DateTime<Utc>, created: bool) {
        if created {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }

    fn apply(&mut self, field: TaskField) {
        match field {
            TaskField::Status(s) => self.status = s,
            TaskField::ParentId(p) => self.parent_id = Some(p),
            TaskField::Scanner(v) => self.scanner = Some(v),
            TaskField::ScannerError(e) => self.scanner_error = Some(e),
            TaskField::ArchivalErrors(e) => self.archival_errors = e,
            TaskField::RestoreErrors(e) => self.restore_errors = e,
            TaskField::Summary(s) => self.summary = Some(s),
            TaskField::Progress(p) => self.progress = Some(p),
        }
    }
}

// ── Operation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Check,
    RebuildIndex,
    Prune,
    Forget,
    Migrate,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Check => "check",
            OperationKind::RebuildIndex => "rebuild-index",
            OperationKind::Prune => "prune",
            OperationKind::Forget => "forget",
            OperationKind::Migrate => "migrate",
        }
    }
}

/// A tracked maintenance job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub repository_id: RepoId,
    pub policy_id: Option<u64>,
    pub kind: OperationKind,
    pub status: JobStatus,
    #[serde(default)]
    pub logs: Vec<LogLine>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum OperationField {
    Status(JobStatus),
    Logs(Vec<LogLine>),
}

impl Record for Operation {
    type Field = OperationField;
    const COLLECTION: &'static str = "operations";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn touch(&mut self, now: DateTime<Utc>, created: bool) {
        if created {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }

    fn apply(&mut self, field: OperationField) {
        match field {
            OperationField::Status(s) => self.status = s,
            OperationField::Logs(l) => self.logs = l,
        }
    }
}
