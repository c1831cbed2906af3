//! In-process repository engine.
//!
//! Keeps repositories, snapshots, blobs and locks in memory and reads
//! backup sources from a registered fixture tree instead of the filesystem.
//! It drives the whole control plane in tests and backs the `memory` engine
//! kind of the server. Faults can be injected per location, path or
//! snapshot to exercise failure handling.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{
    ArchiveEvent, BackupRequest, BackupSummary, CheckOptions, CheckReport, ConnectionOptions,
    EngineLock, EngineRepository, ItemAction, LockInfo, LogFn, PruneOptions, PruneReport,
    RepoConfigInfo, RepoStats, RepositoryEngine, RestoreEvent, RestoreRequest, RestoreSummary,
    ScanEvent, Snapshot,
};
use crate::error::{Result, VigilError};
use crate::lifecycle::LogLevel;
use crate::platform::lock_unpoisoned;
use vigil_types::snapshot_id::SnapshotId;

const STALE_LOCK_AGE_MINUTES: i64 = 30;
const CURRENT_VERSION: u32 = 2;
const UPGRADE_V2: &str = "upgrade_repo_v2";

/// One file in the fixture source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFile {
    pub size: u64,
    /// Stand-in for the content hash; equal values deduplicate.
    pub content: u64,
}

#[derive(Default)]
struct Faults {
    open: HashSet<String>,
    index: HashSet<String>,
    corrupt: HashSet<String>,
    remove: HashSet<SnapshotId>,
    unreadable: HashSet<String>,
    scan: HashSet<String>,
    scan_abort: HashSet<String>,
    refresh: bool,
}

struct Shared {
    repos: Mutex<HashMap<String, Arc<RepoCell>>>,
    sources: Mutex<BTreeMap<String, SourceFile>>,
    restored: Mutex<HashMap<String, Vec<String>>>,
    faults: Mutex<Faults>,
    item_delay: Mutex<Duration>,
    auto_init: bool,
}

struct StoredSnapshot {
    meta: Snapshot,
    tree: BTreeMap<String, SourceFile>,
}

#[derive(Default)]
struct RepoState {
    version: u32,
    index_loaded: bool,
    snapshots: Vec<StoredSnapshot>,
    blobs: HashMap<u64, u64>,
    locks: BTreeMap<u64, LockInfo>,
    next_lock: u64,
    refreshes: u64,
    prunes: u64,
}

struct RepoCell {
    id: String,
    location: String,
    password: String,
    state: Mutex<RepoState>,
}

#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Engine where `open` fails for locations never passed to `init`.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Engine that creates a repository on first `open`.
    pub fn with_auto_init() -> Self {
        Self::build(true)
    }

    fn build(auto_init: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                repos: Mutex::new(HashMap::new()),
                sources: Mutex::new(BTreeMap::new()),
                restored: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                item_delay: Mutex::new(Duration::ZERO),
                auto_init,
            }),
        }
    }

    /// Add or replace a source file. Replacing with a different size counts
    /// as a content change.
    pub fn add_source_file(&self, path: &str, size: u64) {
        let mut sources = lock_unpoisoned(&self.shared.sources, "memory_sources");
        let content = match sources.get(path) {
            Some(old) => old.content.wrapping_add(1),
            None => content_seed(path),
        };
        sources.insert(path.to_string(), SourceFile { size, content });
    }

    /// Sleep this long per item during backup and restore.
    pub fn set_item_delay(&self, delay: Duration) {
        *lock_unpoisoned(&self.shared.item_delay, "memory_delay") = delay;
    }

    pub fn fail_open(&self, location: &str) {
        self.faults().open.insert(location.to_string());
    }

    pub fn fail_index(&self, location: &str) {
        self.faults().index.insert(location.to_string());
    }

    /// Make `check` report damage until the index is rebuilt.
    pub fn corrupt(&self, location: &str) {
        self.faults().corrupt.insert(location.to_string());
    }

    pub fn fail_remove(&self, id: SnapshotId) {
        self.faults().remove.insert(id);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.faults().refresh = fail;
    }

    /// Reading `path` fails during backup; writing it fails during restore.
    pub fn make_unreadable(&self, path: &str) {
        self.faults().unreadable.insert(path.to_string());
    }

    pub fn fail_scan(&self, path: &str) {
        self.faults().scan.insert(path.to_string());
    }

    /// Scanning `target` aborts with an error before reporting any file.
    pub fn abort_scan(&self, target: &str) {
        self.faults().scan_abort.insert(target.to_string());
    }

    /// Insert a snapshot record without file contents.
    pub fn insert_snapshot(&self, location: &str, snapshot: Snapshot) -> Result<()> {
        let cell = self.cell(location)?;
        lock_unpoisoned(&cell.state, "memory_repo").snapshots.push(StoredSnapshot {
            meta: snapshot,
            tree: BTreeMap::new(),
        });
        Ok(())
    }

    /// Place a lock held by another process, acquired `age` ago.
    pub fn plant_lock(&self, location: &str, exclusive: bool, age: chrono::Duration) -> Result<()> {
        let cell = self.cell(location)?;
        let mut state = lock_unpoisoned(&cell.state, "memory_repo");
        state.next_lock += 1;
        let id = state.next_lock;
        state.locks.insert(
            id,
            LockInfo {
                time: Utc::now() - age,
                exclusive,
                hostname: "elsewhere".into(),
                username: "backup".into(),
                pid: 4242,
            },
        );
        Ok(())
    }

    pub fn snapshot_ids(&self, location: &str) -> Vec<SnapshotId> {
        self.cell(location)
            .map(|cell| {
                lock_unpoisoned(&cell.state, "memory_repo")
                    .snapshots
                    .iter()
                    .map(|s| s.meta.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lock_count(&self, location: &str) -> usize {
        self.cell(location)
            .map(|cell| lock_unpoisoned(&cell.state, "memory_repo").locks.len())
            .unwrap_or(0)
    }

    pub fn lock_refreshes(&self, location: &str) -> u64 {
        self.cell(location)
            .map(|cell| lock_unpoisoned(&cell.state, "memory_repo").refreshes)
            .unwrap_or(0)
    }

    /// Number of non-dry-run prunes applied to `location`.
    pub fn prune_count(&self, location: &str) -> u64 {
        self.cell(location)
            .map(|cell| lock_unpoisoned(&cell.state, "memory_repo").prunes)
            .unwrap_or(0)
    }

    pub fn repository_version(&self, location: &str) -> Option<u32> {
        self.cell(location)
            .ok()
            .map(|cell| lock_unpoisoned(&cell.state, "memory_repo").version)
    }

    /// Paths written under `target` by restores.
    pub fn restored(&self, target: &str) -> Vec<String> {
        lock_unpoisoned(&self.shared.restored, "memory_restored")
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        lock_unpoisoned(&self.shared.faults, "memory_faults")
    }

    fn cell(&self, location: &str) -> Result<Arc<RepoCell>> {
        lock_unpoisoned(&self.shared.repos, "memory_repos")
            .get(location)
            .cloned()
            .ok_or_else(|| VigilError::Engine(format!("repository does not exist at '{location}'")))
    }

    fn create(&self, options: &ConnectionOptions) -> Arc<RepoCell> {
        let cell = Arc::new(RepoCell {
            id: format!("{:032x}", rand::random::<u128>()),
            location: options.location.clone(),
            password: options.password.clone(),
            state: Mutex::new(RepoState {
                version: CURRENT_VERSION,
                ..Default::default()
            }),
        });
        lock_unpoisoned(&self.shared.repos, "memory_repos")
            .insert(options.location.clone(), Arc::clone(&cell));
        cell
    }

    fn session(&self, cell: Arc<RepoCell>) -> Arc<dyn EngineRepository> {
        Arc::new(MemoryRepository {
            cell,
            shared: Arc::clone(&self.shared),
        })
    }
}

impl RepositoryEngine for MemoryEngine {
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn EngineRepository>> {
        if self.faults().open.contains(&options.location) {
            return Err(VigilError::Engine(format!(
                "cannot reach '{}': connection timed out",
                options.location
            )));
        }
        let cell = match self.cell(&options.location) {
            Ok(cell) => cell,
            Err(_) if self.shared.auto_init => self.create(options),
            Err(e) => return Err(e),
        };
        if cell.password != options.password {
            return Err(VigilError::Engine(
                "wrong password or no key found".into(),
            ));
        }
        Ok(self.session(cell))
    }

    fn init(&self, options: &ConnectionOptions) -> Result<Arc<dyn EngineRepository>> {
        if self.cell(&options.location).is_ok() {
            return Err(VigilError::Engine(format!(
                "repository already exists at '{}'",
                options.location
            )));
        }
        let cell = self.create(options);
        Ok(self.session(cell))
    }
}

struct MemoryRepository {
    cell: Arc<RepoCell>,
    shared: Arc<Shared>,
}

impl MemoryRepository {
    fn state(&self) -> std::sync::MutexGuard<'_, RepoState> {
        lock_unpoisoned(&self.cell.state, "memory_repo")
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        lock_unpoisoned(&self.shared.faults, "memory_faults")
    }

    fn item_delay(&self) -> Duration {
        *lock_unpoisoned(&self.shared.item_delay, "memory_delay")
    }

    fn files_under(&self, targets: &[String], excludes: &[String]) -> Vec<(String, SourceFile)> {
        lock_unpoisoned(&self.shared.sources, "memory_sources")
            .iter()
            .filter(|(path, _)| targets.iter().any(|t| is_within(path, t)))
            .filter(|(path, _)| !excludes.iter().any(|p| matches_pattern(p, path)))
            .map(|(path, file)| (path.clone(), *file))
            .collect()
    }
}

impl EngineRepository for MemoryRepository {
    fn config(&self) -> RepoConfigInfo {
        RepoConfigInfo {
            id: self.cell.id.clone(),
            version: self.state().version,
        }
    }

    fn load_index(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        if self.faults().index.contains(&self.cell.location) {
            return Err(VigilError::Engine("index is corrupt: unexpected end of file".into()));
        }
        self.state().index_loaded = true;
        Ok(())
    }

    fn rebuild_index(&self, read_all_packs: bool, cancel: &CancellationToken, log: LogFn<'_>) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        let blobs = self.state().blobs.len();
        log(LogLevel::Info, "loading indexes...".into());
        if read_all_packs {
            log(LogLevel::Info, "reading all pack files".into());
        }
        log(LogLevel::Info, format!("rebuilding index from {blobs} blobs"));
        {
            let mut faults = self.faults();
            faults.index.remove(&self.cell.location);
            faults.corrupt.remove(&self.cell.location);
        }
        self.state().index_loaded = true;
        log(LogLevel::Success, "index rebuilt".into());
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> Result<Arc<dyn EngineLock>> {
        let mut state = self.state();
        let conflict = state
            .locks
            .values()
            .find(|held| held.exclusive || exclusive)
            .cloned();
        if let Some(held) = conflict {
            return Err(VigilError::Locked(describe_lock(&held)));
        }
        state.next_lock += 1;
        let id = state.next_lock;
        let info = LockInfo {
            time: Utc::now(),
            exclusive,
            hostname: crate::platform::hostname(),
            username: crate::platform::username(),
            pid: std::process::id(),
        };
        state.locks.insert(id, info.clone());
        Ok(Arc::new(MemoryLock {
            id,
            info,
            cell: Arc::clone(&self.cell),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn remove_locks(&self, all: bool) -> Result<usize> {
        let mut state = self.state();
        let before = state.locks.len();
        if all {
            state.locks.clear();
        } else {
            let cutoff = Utc::now() - chrono::Duration::minutes(STALE_LOCK_AGE_MINUTES);
            state.locks.retain(|_, info| info.time >= cutoff);
        }
        Ok(before - state.locks.len())
    }

    fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.state().snapshots.iter().map(|s| s.meta.clone()).collect())
    }

    fn remove_snapshot(&self, id: &SnapshotId) -> Result<()> {
        if self.faults().remove.contains(id) {
            return Err(VigilError::Engine(format!("remove snapshot {id}: permission denied")));
        }
        let mut state = self.state();
        let pos = state
            .snapshots
            .iter()
            .position(|s| s.meta.id == *id)
            .ok_or_else(|| VigilError::SnapshotNotFound(id.to_hex()))?;
        state.snapshots.remove(pos);
        Ok(())
    }

    fn scan(
        &self,
        targets: &[String],
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(ScanEvent) + Send),
    ) -> Result<()> {
        let (failing, aborting) = {
            let faults = self.faults();
            (faults.scan.clone(), faults.scan_abort.clone())
        };
        if let Some(target) = targets.iter().find(|t| aborting.contains(*t)) {
            return Err(VigilError::Engine(format!("scanner: cannot open {target}")));
        }
        let (mut files, mut bytes) = (0u64, 0u64);
        for (path, file) in self.files_under(targets, &[]) {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }
            if failing.contains(&path) {
                events(ScanEvent::Error {
                    item: path,
                    message: "lstat: permission denied".into(),
                });
                continue;
            }
            files += 1;
            bytes += file.size;
            events(ScanEvent::Progress { files, bytes });
        }
        events(ScanEvent::Finished { files, bytes });
        Ok(())
    }

    fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(ArchiveEvent) + Send),
    ) -> Result<BackupSummary> {
        let files = self.files_under(&request.targets, &request.excludes);
        let unreadable = self.faults().unreadable.clone();
        let delay = self.item_delay();
        let (parent_tree, known_blobs) = {
            let state = self.state();
            let parent = request
                .parent
                .and_then(|p| state.snapshots.iter().find(|s| s.meta.id == p))
                .map(|s| s.tree.clone())
                .unwrap_or_default();
            (parent, state.blobs.clone())
        };

        let mut summary = BackupSummary::default();
        let mut tree = BTreeMap::new();
        let mut new_blobs: HashMap<u64, u64> = HashMap::new();
        let mut dir_changes: BTreeMap<String, bool> = BTreeMap::new();

        for (path, file) in files {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }
            let started = Instant::now();
            events(ArchiveEvent::Started { item: path.clone() });
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if unreadable.contains(&path) {
                events(ArchiveEvent::Error {
                    item: path,
                    message: "open: permission denied".into(),
                });
                continue;
            }

            let action = match parent_tree.get(&path) {
                None => ItemAction::New,
                Some(old) if old.content == file.content => ItemAction::Unchanged,
                Some(_) => ItemAction::Modified,
            };
            match action {
                ItemAction::New => summary.files_new += 1,
                ItemAction::Modified => summary.files_changed += 1,
                ItemAction::Unchanged => summary.files_unmodified += 1,
            }
            let mut data_size = 0;
            if !known_blobs.contains_key(&file.content) && !new_blobs.contains_key(&file.content) {
                new_blobs.insert(file.content, file.size);
                summary.data_blobs += 1;
                summary.data_added += file.size;
                data_size = file.size;
            }

            let dir = parent_dir(&path);
            let changed = action != ItemAction::Unchanged;
            *dir_changes.entry(dir).or_insert(false) |= changed;

            tree.insert(path.clone(), file);
            summary.total_files_processed += 1;
            summary.total_bytes_processed += file.size;
            events(ArchiveEvent::ItemCompleted {
                item: path,
                action,
                data_size,
                metadata_size: 0,
                duration: started.elapsed(),
            });
            events(ArchiveEvent::Processed {
                files: summary.total_files_processed,
                bytes: summary.total_bytes_processed,
            });
        }

        let parent_dirs: BTreeSet<String> = parent_tree.keys().map(|p| parent_dir(p)).collect();
        for (dir, changed) in &dir_changes {
            if !parent_dirs.contains(dir) {
                summary.dirs_new += 1;
            } else if *changed {
                summary.dirs_changed += 1;
            } else {
                summary.dirs_unmodified += 1;
            }
        }
        summary.tree_blobs = summary.dirs_new + summary.dirs_changed;

        if !request.dry_run {
            let id = SnapshotId::generate();
            let meta = Snapshot {
                id,
                time: Utc::now(),
                hostname: request.host.clone(),
                username: crate::platform::username(),
                paths: request.targets.clone(),
                tags: request.tags.clone(),
                parent: request.parent,
                total_files: summary.total_files_processed,
                total_bytes: summary.total_bytes_processed,
            };
            let mut state = self.state();
            state.blobs.extend(new_blobs);
            state.snapshots.push(StoredSnapshot { meta, tree });
            summary.snapshot_id = Some(id);
        }
        Ok(summary)
    }

    fn restore(
        &self,
        request: &RestoreRequest,
        cancel: &CancellationToken,
        events: &mut (dyn FnMut(RestoreEvent) + Send),
    ) -> Result<RestoreSummary> {
        let snapshot = request
            .snapshot
            .ok_or_else(|| VigilError::InvalidArgument("no snapshot selected".into()))?;
        let tree: Vec<(String, SourceFile)> = {
            let state = self.state();
            let stored = state
                .snapshots
                .iter()
                .find(|s| s.meta.id == snapshot)
                .ok_or_else(|| VigilError::SnapshotNotFound(snapshot.to_hex()))?;
            stored
                .tree
                .iter()
                .filter(|(p, _)| request.include.is_empty() || request.include.iter().any(|i| matches_pattern(i, p)))
                .filter(|(p, _)| !request.exclude.iter().any(|e| matches_pattern(e, p)))
                .map(|(p, f)| (p.clone(), *f))
                .collect()
        };
        let unwritable = self.faults().unreadable.clone();
        let delay = self.item_delay();

        events(RestoreEvent::Totals {
            files: tree.len() as u64,
            bytes: tree.iter().map(|(_, f)| f.size).sum(),
        });

        let mut summary = RestoreSummary::default();
        let mut written = Vec::with_capacity(tree.len());
        for (path, file) in tree {
            if cancel.is_cancelled() {
                return Err(VigilError::Cancelled);
            }
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if unwritable.contains(&path) {
                events(RestoreEvent::Error {
                    item: path,
                    message: "create: permission denied".into(),
                });
                continue;
            }
            summary.files_restored += 1;
            summary.bytes_restored += file.size;
            written.push(format!("{}{}", request.target.trim_end_matches('/'), path));
            events(RestoreEvent::Processed {
                files: summary.files_restored,
                bytes: summary.bytes_restored,
            });
        }
        if request.verify {
            summary.verified_files = Some(written.len() as u64);
        }
        lock_unpoisoned(&self.shared.restored, "memory_restored")
            .entry(request.target.clone())
            .or_default()
            .extend(written);
        Ok(summary)
    }

    fn check(&self, options: &CheckOptions, cancel: &CancellationToken, log: LogFn<'_>) -> Result<CheckReport> {
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        log(LogLevel::Info, "load indexes".into());
        log(LogLevel::Info, "check all packs".into());
        log(LogLevel::Info, "check snapshots, trees and blobs".into());
        let snapshots_checked = self.state().snapshots.len();
        if options.read_data {
            log(LogLevel::Info, "read all data".into());
        }
        let mut errors = Vec::new();
        if self.faults().corrupt.contains(&self.cell.location) {
            errors.push("pack 3fa2c1: contains blob with invalid hash".to_string());
        }
        Ok(CheckReport {
            snapshots_checked,
            errors,
        })
    }

    fn prune(&self, options: &PruneOptions, cancel: &CancellationToken, log: LogFn<'_>) -> Result<PruneReport> {
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        log(LogLevel::Info, "loading all snapshots...".into());
        log(LogLevel::Info, "finding data that is still in use".into());
        let mut state = self.state();
        let referenced: HashSet<u64> = state
            .snapshots
            .iter()
            .flat_map(|s| s.tree.values().map(|f| f.content))
            .collect();
        let unused: Vec<(u64, u64)> = state
            .blobs
            .iter()
            .filter(|(content, _)| !referenced.contains(content))
            .map(|(c, s)| (*c, *s))
            .collect();
        let report = PruneReport {
            blobs_removed: unused.len() as u64,
            bytes_freed: unused.iter().map(|(_, s)| s).sum(),
        };
        log(
            LogLevel::Info,
            format!("collecting packs for deletion and repacking (max unused {})", options.max_unused),
        );
        if !options.dry_run {
            for (content, _) in &unused {
                state.blobs.remove(content);
            }
            state.prunes += 1;
        }
        Ok(report)
    }

    fn migrations(&self) -> Vec<String> {
        vec![UPGRADE_V2.to_string()]
    }

    fn migrate(&self, name: &str, force: bool, cancel: &CancellationToken, log: LogFn<'_>) -> Result<()> {
        if name != UPGRADE_V2 {
            return Err(VigilError::InvalidArgument(format!("unknown migration '{name}'")));
        }
        if cancel.is_cancelled() {
            return Err(VigilError::Cancelled);
        }
        let mut state = self.state();
        if state.version >= CURRENT_VERSION && !force {
            log(LogLevel::Info, format!("migration {name} does not apply, repository is already version {}", state.version));
            return Ok(());
        }
        state.version = CURRENT_VERSION;
        log(LogLevel::Info, format!("applied migration {name}"));
        Ok(())
    }

    fn stats(&self) -> Result<RepoStats> {
        let state = self.state();
        Ok(RepoStats {
            snapshots: state.snapshots.len(),
            latest_snapshot: state.snapshots.iter().map(|s| s.meta.time).max(),
            total_files: state.snapshots.iter().map(|s| s.meta.total_files).sum(),
            total_size: state.snapshots.iter().map(|s| s.meta.total_bytes).sum(),
            raw_data_size: state.blobs.values().sum(),
        })
    }
}

struct MemoryLock {
    id: u64,
    info: LockInfo,
    cell: Arc<RepoCell>,
    shared: Arc<Shared>,
}

impl EngineLock for MemoryLock {
    fn info(&self) -> LockInfo {
        self.info.clone()
    }

    fn refresh(&self) -> Result<()> {
        if lock_unpoisoned(&self.shared.faults, "memory_faults").refresh {
            return Err(VigilError::Engine("lock refresh: backend unavailable".into()));
        }
        let mut state = lock_unpoisoned(&self.cell.state, "memory_repo");
        state.refreshes += 1;
        match state.locks.get_mut(&self.id) {
            Some(info) => {
                info.time = Utc::now();
                Ok(())
            }
            None => Err(VigilError::Engine("lock was removed by another process".into())),
        }
    }

    fn unlock(&self) -> Result<()> {
        lock_unpoisoned(&self.cell.state, "memory_repo").locks.remove(&self.id);
        Ok(())
    }
}

fn describe_lock(info: &LockInfo) -> String {
    format!(
        "{} lock held by {}@{} (PID {}) since {}",
        if info.exclusive { "exclusive" } else { "shared" },
        info.username,
        info.hostname,
        info.pid,
        info.time.to_rfc3339(),
    )
}

fn content_seed(path: &str) -> u64 {
    path.bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3))
}

fn is_within(path: &str, target: &str) -> bool {
    let target = target.trim_end_matches('/');
    target.is_empty() || path == target || path.starts_with(&format!("{target}/"))
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => "/".to_string(),
    }
}

/// `dir/*` matches by prefix; anything else matches the exact path, a
/// parent directory, or the file name.
fn matches_pattern(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    is_within(path, pattern) || path.rsplit('/').next() == Some(pattern)
}
