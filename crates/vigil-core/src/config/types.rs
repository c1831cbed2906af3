use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::engine::BackendKind;
use crate::error::{Result, VigilError};

/// Top-level control plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub forget: ForgetConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Repositories inserted into the repository store on startup when no
    /// record with the same name exists yet.
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

impl VigilConfig {
    pub fn validate(&self) -> Result<()> {
        self.locks.refresh_interval()?;
        self.locks.backup_guard_ttl()?;
        self.progress.tick()?;
        self.progress.min_update_pause()?;
        self.status.stats_ttl()?;
        self.schedule.reconcile_every()?;
        self.schedule.policies_every()?;
        if self.forget.delete_workers == 0 {
            return Err(VigilError::Config("forget.delete_workers must be at least 1".into()));
        }
        if self.status.check_workers == 0 {
            return Err(VigilError::Config("status.check_workers must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repositories {
            if !seen.insert(repo.name.as_str()) {
                return Err(VigilError::Config(format!(
                    "duplicate repository name '{}'",
                    repo.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the JSON record collections.
    #[serde(default = "default_data_dir")]
    pub dir: String,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub no_cache: bool,
    /// Engine implementation used to open repositories.
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            cache_dir: None,
            no_cache: false,
            engine: default_engine(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// Safety-net expiry for the per-path backup flag.
    #[serde(default = "default_backup_guard_ttl")]
    pub backup_guard_ttl: String,
}

impl LockConfig {
    pub fn refresh_interval(&self) -> Result<Duration> {
        non_zero("locks.refresh_interval", &self.refresh_interval)
    }

    pub fn backup_guard_ttl(&self) -> Result<Duration> {
        non_zero("locks.backup_guard_ttl", &self.backup_guard_ttl)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            backup_guard_ttl: default_backup_guard_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_tick")]
    pub tick: String,
    #[serde(default = "default_min_update_pause")]
    pub min_update_pause: String,
    #[serde(default = "default_max_recorded_errors")]
    pub max_recorded_errors: usize,
    #[serde(default = "default_max_log_errors")]
    pub max_log_errors: usize,
}

impl ProgressConfig {
    pub fn tick(&self) -> Result<Duration> {
        non_zero("progress.tick", &self.tick)
    }

    pub fn min_update_pause(&self) -> Result<Duration> {
        parse_human_duration(&self.min_update_pause)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            min_update_pause: default_min_update_pause(),
            max_recorded_errors: default_max_recorded_errors(),
            max_log_errors: default_max_log_errors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetConfig {
    #[serde(default = "default_delete_workers")]
    pub delete_workers: usize,
    /// Passed to prune after a forget removed snapshots.
    #[serde(default = "default_prune_max_unused")]
    pub prune_max_unused: String,
}

impl Default for ForgetConfig {
    fn default() -> Self {
        Self {
            delete_workers: default_delete_workers(),
            prune_max_unused: default_prune_max_unused(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_check_workers")]
    pub check_workers: usize,
    #[serde(default = "default_stats_ttl")]
    pub stats_ttl: String,
}

impl StatusConfig {
    pub fn stats_ttl(&self) -> Result<Duration> {
        parse_human_duration(&self.stats_ttl)
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            check_workers: default_check_workers(),
            stats_ttl: default_stats_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_reconcile_every")]
    pub reconcile_every: String,
    #[serde(default = "default_true")]
    pub policies_enabled: bool,
    #[serde(default = "default_policies_every")]
    pub policies_every: String,
    #[serde(default)]
    pub jitter_seconds: u64,
    /// Run an integrity check on every repository after each policy run.
    #[serde(default)]
    pub auto_check: bool,
}

impl ScheduleConfig {
    pub fn reconcile_every(&self) -> Result<Duration> {
        non_zero("schedule.reconcile_every", &self.reconcile_every)
    }

    pub fn policies_every(&self) -> Result<Duration> {
        non_zero("schedule.policies_every", &self.policies_every)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            reconcile_every: default_reconcile_every(),
            policies_enabled: true,
            policies_every: default_policies_every(),
            jitter_seconds: 0,
            auto_check: false,
        }
    }
}

/// A repository declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    #[serde(default)]
    pub backend: BackendKind,
    pub url: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

fn non_zero(field: &str, raw: &str) -> Result<Duration> {
    let d = parse_human_duration(raw)?;
    if d.is_zero() {
        return Err(VigilError::Config(format!("{field} must be greater than zero")));
    }
    Ok(d)
}
