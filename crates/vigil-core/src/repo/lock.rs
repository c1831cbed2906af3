//! Advisory repository locks held by this process.
//!
//! Every lock acquired through [`LockManager`] joins one global set. While
//! the set is non-empty a single heartbeat task refreshes each lock at a
//! fixed interval so other processes never see it as stale. The heartbeat
//! starts with the first acquisition and stops when the last lock is
//! released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::RepositoryHandle;
use crate::engine::{EngineLock, LockInfo};
use crate::error::{Result, VigilError};
use crate::platform::lock_unpoisoned;
use vigil_types::RepoId;

/// Proof of a held lock. Hand it back to [`LockManager::release`] exactly once.
#[derive(Debug)]
pub struct RepoLock {
    id: u64,
    repo_id: RepoId,
    info: LockInfo,
}

impl RepoLock {
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn is_exclusive(&self) -> bool {
        self.info.exclusive
    }
}

struct HeldLock {
    id: u64,
    repo_id: RepoId,
    lock: Arc<dyn EngineLock>,
}

#[derive(Default)]
struct LockSet {
    next_id: u64,
    held: Vec<HeldLock>,
    heartbeat: Option<CancellationToken>,
}

struct Inner {
    refresh_interval: Duration,
    set: Mutex<LockSet>,
}

#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl LockManager {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresh_interval,
                set: Mutex::new(LockSet::default()),
            }),
        }
    }

    pub async fn acquire_shared(&self, repo: &RepositoryHandle) -> Result<RepoLock> {
        self.acquire(repo, false).await
    }

    pub async fn acquire_exclusive(&self, repo: &RepositoryHandle) -> Result<RepoLock> {
        self.acquire(repo, true).await
    }

    /// Ask the engine for a lock. Never waits for a conflicting holder.
    async fn acquire(&self, repo: &RepositoryHandle, exclusive: bool) -> Result<RepoLock> {
        let session = Arc::clone(&repo.session);
        let lock = tokio::task::spawn_blocking(move || session.lock(exclusive))
            .await
            .map_err(|e| VigilError::Other(format!("lock task failed: {e}")))??;
        let info = lock.info();

        let mut set = lock_unpoisoned(&self.inner.set, "global_lock_set");
        set.next_id += 1;
        let id = set.next_id;
        set.held.push(HeldLock {
            id,
            repo_id: repo.id,
            lock,
        });
        if set.heartbeat.is_none() {
            let stop = CancellationToken::new();
            spawn_heartbeat(Arc::clone(&self.inner), stop.clone());
            set.heartbeat = Some(stop);
        }
        debug!(repo_id = repo.id, exclusive, held = set.held.len(), "repository lock acquired");

        Ok(RepoLock {
            id,
            repo_id: repo.id,
            info,
        })
    }

    /// Remove `lock` from the global set and unlock it in the engine.
    ///
    /// Blocking: call from the blocking pool or a cleanup callback. An engine
    /// unlock failure is logged; the lock then ages out as stale.
    pub fn release(&self, lock: RepoLock) {
        let removed = {
            let mut set = lock_unpoisoned(&self.inner.set, "global_lock_set");
            let removed = set
                .held
                .iter()
                .position(|h| h.id == lock.id)
                .map(|pos| set.held.remove(pos));
            if set.held.is_empty() {
                if let Some(stop) = set.heartbeat.take() {
                    stop.cancel();
                }
            }
            removed
        };

        let Some(held) = removed else {
            warn!(repo_id = lock.repo_id, "released a lock that was not held");
            return;
        };
        if let Err(e) = held.lock.unlock() {
            warn!(repo_id = held.repo_id, error = %e, "failed to unlock repository");
        } else {
            debug!(repo_id = held.repo_id, "repository lock released");
        }
    }

    /// Release every held lock (shutdown).
    pub fn release_all(&self) {
        let drained = {
            let mut set = lock_unpoisoned(&self.inner.set, "global_lock_set");
            if let Some(stop) = set.heartbeat.take() {
                stop.cancel();
            }
            std::mem::take(&mut set.held)
        };
        for held in drained {
            if let Err(e) = held.lock.unlock() {
                warn!(repo_id = held.repo_id, error = %e, "failed to unlock repository");
            }
        }
    }

    /// Info for every lock currently held by this process.
    pub fn held_locks(&self) -> Vec<(RepoId, LockInfo)> {
        lock_unpoisoned(&self.inner.set, "global_lock_set")
            .held
            .iter()
            .map(|h| (h.repo_id, h.lock.info()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner.set, "global_lock_set").held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn heartbeat_running(&self) -> bool {
        lock_unpoisoned(&self.inner.set, "global_lock_set")
            .heartbeat
            .is_some()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh_interval
    }
}

fn spawn_heartbeat(inner: Arc<Inner>, stop: CancellationToken) {
    tokio::spawn(async move {
        let period = inner.refresh_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(interval_secs = period.as_secs_f64(), "lock heartbeat started");

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let locks: Vec<(RepoId, Arc<dyn EngineLock>)> = lock_unpoisoned(&inner.set, "global_lock_set")
                .held
                .iter()
                .map(|h| (h.repo_id, Arc::clone(&h.lock)))
                .collect();

            let refreshed = tokio::task::spawn_blocking(move || {
                locks
                    .into_iter()
                    .filter_map(|(repo_id, lock)| lock.refresh().err().map(|e| (repo_id, e)))
                    .collect::<Vec<_>>()
            })
            .await;

            match refreshed {
                Ok(failures) => {
                    for (repo_id, e) in failures {
                        warn!(repo_id, error = %e, "lock refresh failed");
                    }
                }
                Err(e) => warn!(error = %e, "lock refresh task failed"),
            }
        }
        debug!("lock heartbeat stopped");
    });
}
