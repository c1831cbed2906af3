use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Counts, Throttle, Weights, percent_done, seconds_remaining};
use crate::engine::{ArchiveEvent, ItemAction, RestoreEvent, ScanEvent};
use crate::error::{Result, VigilError};
use crate::lifecycle::{
    ClientMessage, ErrorPhase, ErrorUpdate, JobStatus, StatusUpdate, SummaryOutput, TaskField,
    TaskKind, TaskService, VerboseAction, VerboseUpdate,
};
use vigil_types::JobId;

/// Updates fed into a task's progress loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Running totals from the scanner (or the restore planner).
    Totals { files: u64, bytes: u64 },
    ScanFinished { files: u64, bytes: u64, duration: Duration },
    ScanError { item: String, message: String },
    /// Running processed totals.
    Processed { files: u64, bytes: u64 },
    Started { item: String },
    Completed {
        item: String,
        action: ItemAction,
        data_size: u64,
        metadata_size: u64,
        duration: Duration,
    },
    ItemError { item: String, message: String },
    /// Emit a status message now, bypassing the throttle.
    Force,
}

/// Cloneable handle used by workers, including blocking engine callbacks.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    scan_started: Instant,
}

impl ProgressSender {
    pub fn send(&self, event: ProgressEvent) {
        // The loop only goes away after cancellation; late events are moot.
        let _ = self.tx.send(event);
    }

    pub fn scan(&self, event: ScanEvent) {
        self.send(match event {
            ScanEvent::Progress { files, bytes } => ProgressEvent::Totals { files, bytes },
            ScanEvent::Error { item, message } => ProgressEvent::ScanError { item, message },
            ScanEvent::Finished { files, bytes } => ProgressEvent::ScanFinished {
                files,
                bytes,
                duration: self.scan_started.elapsed(),
            },
        });
    }

    pub fn archive(&self, event: ArchiveEvent) {
        self.send(match event {
            ArchiveEvent::Started { item } => ProgressEvent::Started { item },
            ArchiveEvent::Processed { files, bytes } => ProgressEvent::Processed { files, bytes },
            ArchiveEvent::ItemCompleted {
                item,
                action,
                data_size,
                metadata_size,
                duration,
            } => ProgressEvent::Completed {
                item,
                action,
                data_size,
                metadata_size,
                duration,
            },
            ArchiveEvent::Error { item, message } => ProgressEvent::ItemError { item, message },
        });
    }

    pub fn restore(&self, event: RestoreEvent) {
        self.send(match event {
            RestoreEvent::Totals { files, bytes } => ProgressEvent::Totals { files, bytes },
            RestoreEvent::Processed { files, bytes } => ProgressEvent::Processed { files, bytes },
            RestoreEvent::Error { item, message } => ProgressEvent::ItemError { item, message },
        });
    }
}

#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub tick: Duration,
    pub min_update_pause: Duration,
    pub max_errors: usize,
    pub weights: Weights,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            min_update_pause: Duration::from_secs(1),
            max_errors: 20,
            weights: Weights::BACKUP,
        }
    }
}

/// Per-task progress state and event loop.
///
/// Workers push [`ProgressEvent`]s; [`run`](Self::run) folds them into
/// counters and emits rate-limited messages to the attached client,
/// persisting what it emits. [`finish`](Self::finish) or
/// [`fail`](Self::fail) settle the record and close the live entry.
pub struct TaskReporter {
    task_id: JobId,
    kind: TaskKind,
    tasks: TaskService,
    settings: ReporterSettings,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    started: Instant,
    total: Counts,
    done: Counts,
    current: BTreeSet<String>,
    error_count: u64,
    item_errors: Vec<ErrorUpdate>,
    scanner_error: bool,
    throttle: Throttle,
}

impl TaskReporter {
    pub fn new(
        task_id: JobId,
        kind: TaskKind,
        tasks: TaskService,
        settings: ReporterSettings,
    ) -> (Self, ProgressSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let throttle = Throttle::new(settings.min_update_pause);
        let reporter = Self {
            task_id,
            kind,
            tasks,
            settings,
            rx,
            started: now,
            total: Counts::default(),
            done: Counts::default(),
            current: BTreeSet::new(),
            error_count: 0,
            item_errors: Vec::new(),
            scanner_error: false,
            throttle,
        };
        (
            reporter,
            ProgressSender {
                tx,
                scan_started: now,
            },
        )
    }

    pub fn task_id(&self) -> JobId {
        self.task_id
    }

    /// Process events until every [`ProgressSender`] is dropped or `cancel`
    /// fires. A rebind signal re-sends the current status to the newly
    /// attached client.
    pub async fn run(&mut self, cancel: &CancellationToken, mut rebind: mpsc::UnboundedReceiver<()>) {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rebind_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = self.task_id, "progress loop cancelled");
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                signal = rebind.recv(), if rebind_open => match signal {
                    Some(()) => self.print_status(true),
                    None => rebind_open = false,
                },
                _ = ticker.tick() => self.print_status(false),
            }
        }
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Totals { files, bytes } => {
                self.total = Counts::new(files, bytes);
            }
            ProgressEvent::ScanFinished {
                files,
                bytes,
                duration,
            } => {
                self.total = Counts::new(files, bytes);
                let verbose = VerboseUpdate {
                    action: VerboseAction::ScanFinished,
                    item: String::new(),
                    duration: duration.as_secs_f64(),
                    data_size: bytes,
                    metadata_size: 0,
                    total_files: files,
                };
                self.persist(TaskField::Scanner(verbose.clone()));
                self.emit(ClientMessage::Verbose(verbose), true);
            }
            ProgressEvent::ScanError { item, message } => {
                self.error_count += 1;
                self.scanner_error = true;
                let error = ErrorUpdate {
                    error: message,
                    during: ErrorPhase::Scan,
                    item,
                };
                self.persist(TaskField::ScannerError(error.clone()));
                self.emit(ClientMessage::Error(error), true);
            }
            ProgressEvent::Processed { files, bytes } => {
                self.done = Counts::new(files, bytes);
            }
            ProgressEvent::Started { item } => {
                self.current.insert(item);
            }
            ProgressEvent::Completed {
                item,
                action,
                data_size,
                metadata_size,
                duration,
            } => {
                self.current.remove(&item);
                let verbose = VerboseUpdate {
                    action: action.into(),
                    item,
                    duration: duration.as_secs_f64(),
                    data_size,
                    metadata_size,
                    total_files: self.total.files,
                };
                self.emit(ClientMessage::Verbose(verbose), false);
            }
            ProgressEvent::ItemError { item, message } => {
                self.error_count += 1;
                self.current.remove(&item);
                let error = ErrorUpdate {
                    error: message,
                    during: self.item_phase(),
                    item,
                };
                if self.item_errors.len() < self.settings.max_errors {
                    self.item_errors.push(error.clone());
                    self.persist(self.errors_field(self.item_errors.clone()));
                }
                self.emit(ClientMessage::Error(error), true);
            }
            ProgressEvent::Force => self.print_status(true),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> StatusUpdate {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        StatusUpdate {
            seconds_elapsed: elapsed.as_secs(),
            seconds_remaining: seconds_remaining(elapsed, self.total.bytes, self.done.bytes),
            percent_done: percent_done(self.total, self.done, self.settings.weights),
            total_files: self.total.files,
            files_done: self.done.files,
            total_bytes: self.total.bytes,
            bytes_done: self.done.bytes,
            error_count: self.error_count,
            current_files: self.current.iter().cloned().collect(),
            avg_speed: if secs > 0.0 {
                (self.done.bytes as f64 / secs) as u64
            } else {
                0
            },
        }
    }

    fn print_status(&mut self, force: bool) {
        let status = self.status();
        self.tasks
            .live()
            .with_state(self.task_id, |s| s.progress = Some(status.clone()));
        if self.emit(ClientMessage::Status(status.clone()), force) {
            self.persist(TaskField::Progress(status));
        }
    }

    /// Send `message` unless the throttle suppresses it. Returns whether it
    /// was accepted.
    fn emit(&mut self, message: ClientMessage, force: bool) -> bool {
        if !self.throttle.allow(force) {
            return false;
        }
        self.tasks.live().send(self.task_id, &message);
        true
    }

    fn persist(&self, field: TaskField) {
        if let Err(e) = self.tasks.update_field(self.task_id, field) {
            warn!(task_id = self.task_id, error = %e, "failed to persist task progress");
        }
    }

    fn item_phase(&self) -> ErrorPhase {
        match self.kind {
            TaskKind::Backup => ErrorPhase::Archival,
            TaskKind::Restore => ErrorPhase::Restore,
        }
    }

    fn errors_field(&self, errors: Vec<ErrorUpdate>) -> TaskField {
        match self.kind {
            TaskKind::Backup => TaskField::ArchivalErrors(errors),
            TaskKind::Restore => TaskField::RestoreErrors(errors),
        }
    }

    /// Record an error that does not belong to a single item, bypassing the
    /// error cap.
    pub fn record_error(&mut self, during: ErrorPhase, item: &str, message: String) {
        self.error_count += 1;
        let error = ErrorUpdate {
            error: message,
            during,
            item: item.to_string(),
        };
        self.item_errors.push(error.clone());
        self.persist(self.errors_field(self.item_errors.clone()));
        self.emit(ClientMessage::Error(error), true);
    }

    /// Record a scan that aborted as a whole. The task settles as Error.
    pub fn scan_failed(&mut self, error: &VigilError) {
        self.error_count += 1;
        self.scanner_error = true;
        let error = ErrorUpdate {
            error: error.to_string(),
            during: ErrorPhase::Scan,
            item: String::new(),
        };
        self.persist(TaskField::ScannerError(error.clone()));
        self.emit(ClientMessage::Error(error), true);
    }

    /// Number of per-item errors seen, including those past the cap.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Settle a completed task: send the summary and a 100% status, write
    /// the final record and close the live entry.
    pub fn finish(mut self, mut summary: SummaryOutput) -> Result<JobStatus> {
        let elapsed = self.started.elapsed();
        summary.total_duration = elapsed.as_secs_f64();
        self.total.files = self.total.files.max(self.done.files);
        self.total.bytes = self.total.bytes.max(self.done.bytes);
        self.done = self.total;
        self.current.clear();

        let mut status = self.status();
        status.percent_done = 1.0;
        status.seconds_remaining = 0;

        self.emit(ClientMessage::Summary(summary.clone()), true);
        self.emit(ClientMessage::Status(status.clone()), true);

        let outcome = self.settle(|task| {
            task.summary = Some(summary);
            task.progress = Some(status);
        });
        self.tasks.live().close(self.task_id, "finished");
        outcome
    }

    /// Settle a task that aborted with `error`.
    pub fn fail(mut self, error: &VigilError) -> Result<JobStatus> {
        let phase = match self.kind {
            TaskKind::Backup => ErrorPhase::Backup,
            TaskKind::Restore => ErrorPhase::Restore,
        };
        self.record_error(phase, "", error.to_string());
        let status = self.status();
        let outcome = self.settle(|task| task.progress = Some(status));
        self.tasks.live().close(self.task_id, "failed");
        outcome
    }

    fn settle(&self, update: impl FnOnce(&mut crate::lifecycle::Task)) -> Result<JobStatus> {
        let mut task = self.tasks.get(self.task_id)?;
        update(&mut task);
        task.status = if task.has_errors() || self.error_count > 0 || self.scanner_error {
            JobStatus::Error
        } else {
            JobStatus::End
        };
        self.tasks.update(&task)?;
        info!(task_id = self.task_id, status = ?task.status, errors = self.error_count, "task finished");
        Ok(task.status)
    }
}
