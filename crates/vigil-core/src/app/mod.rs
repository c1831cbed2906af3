//! Application-scoped context shared by every orchestration.

pub mod scheduler;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::commands::policy::{ForgetPolicy, PolicyService};
use crate::commands::stats::StatsCache;
use crate::config::VigilConfig;
use crate::engine::{MemoryEngine, RepositoryEngine};
use crate::error::{Result, VigilError};
use crate::lifecycle::{
    JsonFileStore, LiveRegistry, LogRegistry, MemoryStore, Operation, OperationService,
    ReconcileReport, RecordStore, Task, TaskService,
};
use crate::progress::{OperationLog, ReporterSettings, Weights};
use crate::repo::{BackupGuard, LockManager, ReloadReport, RepositoryRecord, RepositoryRegistry};
use vigil_types::JobId;

/// Durations and limits resolved from [`VigilConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub refresh_interval: Duration,
    pub backup_guard_ttl: Duration,
    pub tick: Duration,
    pub min_update_pause: Duration,
    pub max_recorded_errors: usize,
    pub max_log_errors: usize,
    pub delete_workers: usize,
    pub prune_max_unused: String,
    pub check_workers: usize,
    pub stats_ttl: Duration,
}

impl Settings {
    pub fn from_config(config: &VigilConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            refresh_interval: config.locks.refresh_interval()?,
            backup_guard_ttl: config.locks.backup_guard_ttl()?,
            tick: config.progress.tick()?,
            min_update_pause: config.progress.min_update_pause()?,
            max_recorded_errors: config.progress.max_recorded_errors,
            max_log_errors: config.progress.max_log_errors,
            delete_workers: config.forget.delete_workers,
            prune_max_unused: config.forget.prune_max_unused.clone(),
            check_workers: config.status.check_workers,
            stats_ttl: config.status.stats_ttl()?,
        })
    }
}

/// Persisted collections.
#[derive(Clone)]
pub struct Stores {
    pub repositories: Arc<dyn RecordStore<RepositoryRecord>>,
    pub tasks: Arc<dyn RecordStore<Task>>,
    pub operations: Arc<dyn RecordStore<Operation>>,
    pub policies: Arc<dyn RecordStore<ForgetPolicy>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            repositories: Arc::new(MemoryStore::new()),
            tasks: Arc::new(MemoryStore::new()),
            operations: Arc::new(MemoryStore::new()),
            policies: Arc::new(MemoryStore::new()),
        }
    }

    pub fn open_json(dir: &Path) -> Result<Self> {
        Ok(Self {
            repositories: Arc::new(JsonFileStore::open(dir)?),
            tasks: Arc::new(JsonFileStore::open(dir)?),
            operations: Arc::new(JsonFileStore::open(dir)?),
            policies: Arc::new(JsonFileStore::open(dir)?),
        })
    }

    /// Wait until every collection has written out its pending records.
    pub fn flush(&self) -> Result<()> {
        self.repositories.flush()?;
        self.tasks.flush()?;
        self.operations.flush()?;
        self.policies.flush()
    }
}

/// Build the engine named by `data.engine`.
pub fn engine_for(kind: &str) -> Result<Arc<dyn RepositoryEngine>> {
    match kind {
        "memory" => Ok(Arc::new(MemoryEngine::with_auto_init())),
        other => Err(VigilError::UnsupportedBackend(other.to_string())),
    }
}

pub struct AppContext {
    pub config: VigilConfig,
    pub settings: Settings,
    pub engine: Arc<dyn RepositoryEngine>,
    pub registry: RepositoryRegistry,
    pub locks: LockManager,
    pub backup_guard: BackupGuard,
    pub repositories: Arc<dyn RecordStore<RepositoryRecord>>,
    pub policies: PolicyService,
    pub tasks: TaskService,
    pub operations: OperationService,
    pub logs: Arc<LogRegistry>,
    pub stats: StatsCache,
    next_log_id: AtomicU64,
    stores: Stores,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl AppContext {
    pub fn new(config: VigilConfig, engine: Arc<dyn RepositoryEngine>, stores: Stores) -> Result<Arc<Self>> {
        let settings = Settings::from_config(&config)?;
        let shutdown = CancellationToken::new();
        let kept = stores.clone();
        Ok(Arc::new(Self {
            registry: RepositoryRegistry::new(shutdown.child_token()),
            locks: LockManager::new(settings.refresh_interval),
            backup_guard: BackupGuard::new(settings.backup_guard_ttl),
            repositories: stores.repositories,
            policies: PolicyService::new(stores.policies),
            tasks: TaskService::new(stores.tasks, Arc::new(LiveRegistry::new("tasks"))),
            operations: OperationService::new(stores.operations, Arc::new(LiveRegistry::new("operations"))),
            logs: Arc::new(LiveRegistry::new("logs")),
            stats: StatsCache::new(settings.stats_ttl),
            next_log_id: AtomicU64::new(1),
            stores: kept,
            settings,
            config,
            engine,
            shutdown,
            tracker: TaskTracker::new(),
        }))
    }

    /// Insert configured repositories whose name is not stored yet.
    pub fn seed_repositories(&self) -> Result<usize> {
        let existing: Vec<String> = self.repositories.list()?.into_iter().map(|r| r.name).collect();
        let mut added = 0;
        for entry in &self.config.repositories {
            if existing.contains(&entry.name) {
                continue;
            }
            let mut record = RepositoryRecord::from(entry);
            self.repositories.create(&mut record)?;
            info!(repo_id = record.id, name = %record.name, "repository added from config");
            added += 1;
        }
        Ok(added)
    }

    /// Store a new repository, create it in the engine and reload the registry.
    pub async fn init_repository(&self, mut record: RepositoryRecord) -> Result<RepositoryRecord> {
        let options = crate::engine::ConnectionOptions::resolve(&record, &self.config.data);
        let engine = Arc::clone(&self.engine);
        crate::commands::blocking(move || engine.init(&options).map(|_| ())).await?;
        self.repositories.create(&mut record)?;
        self.reload_repositories().await?;
        Ok(record)
    }

    pub async fn reload_repositories(&self) -> Result<ReloadReport> {
        let records = self.repositories.list()?;
        Ok(self
            .registry
            .reload(Arc::clone(&self.engine), records, &self.config.data)
            .await)
    }

    pub fn reconcile_tasks(&self) -> Result<ReconcileReport> {
        self.tasks.reconcile()
    }

    /// A fresh cancellable scope for one job.
    pub fn job_scope(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run a job worker; [`shutdown`](Self::shutdown) waits for it.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(future);
    }

    pub fn reporter_settings(&self, weights: Weights) -> ReporterSettings {
        ReporterSettings {
            tick: self.settings.tick,
            min_update_pause: self.settings.min_update_pause,
            max_errors: self.settings.max_recorded_errors,
            weights,
        }
    }

    pub fn operation_log(&self, op_id: JobId) -> OperationLog {
        OperationLog::new(
            Arc::clone(self.operations.live()),
            op_id,
            self.settings.max_log_errors,
            self.settings.min_update_pause,
        )
    }

    /// Open a raw log stream with no persisted record.
    pub fn open_log_stream(&self) -> (OperationLog, mpsc::UnboundedReceiver<()>) {
        let id = self.next_log_id.fetch_add(1, Ordering::Relaxed);
        let rebind = self.logs.open(id, ());
        let log = OperationLog::new(
            Arc::clone(&self.logs),
            id,
            self.settings.max_log_errors,
            self.settings.min_update_pause,
        );
        (log, rebind)
    }

    /// Cancel every job and handle scope, wait for workers and release any
    /// lock still held.
    pub async fn shutdown(&self) {
        info!("shutting down control plane");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.registry.shutdown();
        self.tasks.live().close_all("shutdown");
        self.operations.live().close_all("shutdown");
        self.logs.close_all("shutdown");
        let locks = self.locks.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || locks.release_all()).await {
            tracing::error!(error = %e, "lock release task panicked");
        }
        let stores = self.stores.clone();
        match tokio::task::spawn_blocking(move || stores.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "failed to flush record stores"),
            Err(e) => tracing::error!(error = %e, "store flush task panicked"),
        }
    }
}
