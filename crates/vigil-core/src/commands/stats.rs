use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::blocking;
use crate::app::AppContext;
use crate::error::Result;
use crate::platform::{read_unpoisoned, write_unpoisoned};
use vigil_types::RepoId;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryStats {
    pub repository_id: RepoId,
    pub name: String,
    pub snapshots: usize,
    /// Whole days since the newest snapshot, if there is one.
    pub days_since_last_snapshot: Option<i64>,
    pub total_files: u64,
    pub total_size: u64,
    pub raw_data_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReport {
    pub repositories: Vec<RepositoryStats>,
    pub total_snapshots: usize,
    pub total_files: u64,
    pub total_size: u64,
    pub raw_data_size: u64,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Last computed [`StatsReport`] plus a single-flight refresh flag.
pub struct StatsCache {
    ttl: Duration,
    report: RwLock<Option<(Instant, StatsReport)>>,
    refreshing: AtomicBool,
}

struct RefreshFlag<'a>(&'a AtomicBool);

impl Drop for RefreshFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            report: RwLock::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn cached(&self) -> Option<StatsReport> {
        read_unpoisoned(&self.report, "stats_cache")
            .as_ref()
            .map(|(_, r)| r.clone())
    }

    fn fresh(&self) -> Option<StatsReport> {
        read_unpoisoned(&self.report, "stats_cache")
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, r)| r.clone())
    }

    fn store(&self, report: StatsReport) {
        *write_unpoisoned(&self.report, "stats_cache") = Some((Instant::now(), report));
    }

    fn try_begin(&self) -> Option<RefreshFlag<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshFlag(&self.refreshing))
    }
}

/// Statistics for every loaded repository.
///
/// Served from cache while it is younger than `status.stats_ttl` unless
/// `force` is set. While one refresh runs, other callers get the cached
/// value (or an empty report) instead of starting their own.
pub async fn repository_stats(ctx: &AppContext, force: bool) -> Result<StatsReport> {
    if !force {
        if let Some(report) = ctx.stats.fresh() {
            return Ok(report);
        }
    }
    let Some(_flag) = ctx.stats.try_begin() else {
        debug!("stats refresh already running, serving cached report");
        return Ok(ctx.stats.cached().unwrap_or_default());
    };

    let now = Utc::now();
    let mut report = StatsReport {
        generated_at: Some(now),
        ..Default::default()
    };
    for handle in ctx.registry.handles() {
        let session = std::sync::Arc::clone(&handle.session);
        let stats = match blocking(move || session.stats()).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(repo_id = handle.id, error = %e, "cannot read repository stats");
                continue;
            }
        };
        report.total_snapshots += stats.snapshots;
        report.total_files += stats.total_files;
        report.total_size += stats.total_size;
        report.raw_data_size += stats.raw_data_size;
        report.repositories.push(RepositoryStats {
            repository_id: handle.id,
            name: handle.name.clone(),
            snapshots: stats.snapshots,
            days_since_last_snapshot: stats.latest_snapshot.map(|t| (now - t).num_days()),
            total_files: stats.total_files,
            total_size: stats.total_size,
            raw_data_size: stats.raw_data_size,
        });
    }
    ctx.stats.store(report.clone());
    Ok(report)
}
