//! Stored retention policies and their scheduled evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::forget::{ForgetOptions, run_forget_sync, start_forget};
use super::prune::run_prune_sync;
use super::util::spawn_replay;
use crate::app::AppContext;
use crate::error::{Result, VigilError};
use crate::lifecycle::{LogLevel, Record, RecordStore};
use crate::platform::{self, lock_unpoisoned};
use crate::retention::{ExpirePolicy, KeepCount, RetentionKind, SnapshotFilter};
use vigil_types::{JobId, RepoId};

/// Keep `count` snapshots of bucket `kind` for one backed-up path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetPolicy {
    pub id: u64,
    pub repository_id: RepoId,
    pub path: String,
    pub kind: RetentionKind,
    pub count: KeepCount,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ForgetPolicy {
    pub fn new(repository_id: RepoId, path: impl Into<String>, kind: RetentionKind, count: KeepCount) -> Self {
        Self {
            id: 0,
            repository_id,
            path: path.into(),
            kind,
            count,
            created_at: None,
            updated_at: None,
        }
    }

    /// Forget options selecting this policy's path on `host`.
    pub fn forget_options(&self, host: &str, prune: bool) -> ForgetOptions {
        ForgetOptions {
            policy: ExpirePolicy::single(self.kind, self.count),
            filter: SnapshotFilter {
                hosts: vec![host.to_string()],
                paths: vec![self.path.clone()],
                tags: Vec::new(),
            },
            prune,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum ForgetPolicyField {
    Kind(RetentionKind),
    Count(KeepCount),
}

impl Record for ForgetPolicy {
    type Field = ForgetPolicyField;
    const COLLECTION: &'static str = "forget_policies";

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

    fn apply(&mut self, field: ForgetPolicyField) {
        match field {
            ForgetPolicyField::Kind(k) => self.kind = k,
            ForgetPolicyField::Count(c) => self.count = c,
        }
    }
}

#[derive(Clone)]
pub struct PolicyService {
    store: Arc<dyn RecordStore<ForgetPolicy>>,
}

impl PolicyService {
    pub fn new(store: Arc<dyn RecordStore<ForgetPolicy>>) -> Self {
        Self { store }
    }

    /// Store a new policy. At most one policy exists per (repository, path).
    pub fn create(&self, mut policy: ForgetPolicy) -> Result<ForgetPolicy> {
        if policy.path.trim().is_empty() {
            return Err(VigilError::InvalidArgument("policy path must not be empty".into()));
        }
        if !self.search(Some(policy.repository_id), Some(&policy.path))?.is_empty() {
            return Err(VigilError::DuplicatePolicy {
                repo_id: policy.repository_id,
                path: policy.path,
            });
        }
        self.store.create(&mut policy)?;
        Ok(policy)
    }

    pub fn get(&self, id: u64) -> Result<ForgetPolicy> {
        self.store.get(id)
    }

    /// Every policy, oldest first.
    pub fn list(&self) -> Result<Vec<ForgetPolicy>> {
        let mut all = self.store.list()?;
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    pub fn search(&self, repository_id: Option<RepoId>, path: Option<&str>) -> Result<Vec<ForgetPolicy>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| repository_id.is_none_or(|r| p.repository_id == r))
            .filter(|p| path.is_none_or(|path| p.path == path))
            .collect())
    }

    pub fn update(&self, policy: &ForgetPolicy) -> Result<()> {
        let clash = self
            .search(Some(policy.repository_id), Some(&policy.path))?
            .into_iter()
            .any(|p| p.id != policy.id);
        if clash {
            return Err(VigilError::DuplicatePolicy {
                repo_id: policy.repository_id,
                path: policy.path.clone(),
            });
        }
        self.store.update(policy)
    }

    pub fn update_field(&self, id: u64, field: ForgetPolicyField) -> Result<()> {
        self.store.update_field(id, field)
    }

    pub fn delete(&self, id: u64) -> Result<()> {
        self.store.delete(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRunReport {
    /// Id of the Log stream the run wrote to.
    pub log_id: u64,
    pub applied: usize,
    pub failed: Vec<(u64, String)>,
    pub removed: usize,
}

/// Apply every stored policy, repository by repository.
///
/// Only the last policy of each repository prunes, so a repository is
/// pruned at most once per run. When that policy removed nothing but an
/// earlier one did, the repository is pruned once after it. Progress goes to a fresh Log stream that
/// clients can bind to while the run is in progress.
pub async fn run_scheduled_policies(ctx: &AppContext) -> Result<PolicyRunReport> {
    let (log, rebind) = ctx.open_log_stream();
    let log_id = log.id();
    let log = log.shared();
    let cancel = ctx.job_scope();
    let replay = spawn_replay(Arc::clone(&log), rebind, cancel.clone());
    let host = platform::hostname();

    let mut by_repo: BTreeMap<RepoId, Vec<ForgetPolicy>> = BTreeMap::new();
    let policies = match ctx.policies.list() {
        Ok(policies) => policies,
        Err(e) => {
            ctx.logs.close(log_id, "failed");
            cancel.cancel();
            return Err(e);
        }
    };
    for policy in policies {
        by_repo.entry(policy.repository_id).or_default().push(policy);
    }

    let mut report = PolicyRunReport {
        log_id,
        ..Default::default()
    };
    for (repo_id, policies) in by_repo {
        let last = policies.len() - 1;
        let mut removed = 0;
        let mut pruned = false;
        for (i, policy) in policies.into_iter().enumerate() {
            let options = policy.forget_options(&host, i == last);
            lock_unpoisoned(&log, "operation_log").append(
                LogLevel::Info,
                format!(
                    "applying policy {}: keep {} {:?} snapshots of '{}' in repository {repo_id}",
                    policy.id, policy.count, policy.kind, policy.path
                ),
            );
            match run_forget_sync(ctx, repo_id, &options, &log).await {
                Ok(outcome) => {
                    report.applied += 1;
                    removed += outcome.removed.len();
                    pruned |= outcome.pruned;
                }
                Err(VigilError::SnapshotNotFound(_)) => {
                    report.applied += 1;
                    lock_unpoisoned(&log, "operation_log")
                        .append(LogLevel::Info, format!("no snapshots of '{}' yet", policy.path));
                }
                Err(e) => {
                    warn!(policy_id = policy.id, repo_id, error = %e, "policy failed");
                    lock_unpoisoned(&log, "operation_log")
                        .append(LogLevel::Error, format!("policy {} failed: {e}", policy.id));
                    report.failed.push((policy.id, e.to_string()));
                }
            }
        }
        report.removed += removed;
        if removed > 0 && !pruned {
            if let Err(e) = run_prune_sync(ctx, repo_id, &log).await {
                warn!(repo_id, error = %e, "prune after policies failed");
                lock_unpoisoned(&log, "operation_log")
                    .append(LogLevel::Error, format!("prune of repository {repo_id} failed: {e}"));
            }
        }
    }

    info!(
        applied = report.applied,
        failed = report.failed.len(),
        removed = report.removed,
        "scheduled policies finished"
    );
    ctx.logs.close(log_id, "finished");
    cancel.cancel();
    replay.abort();
    Ok(report)
}

/// Apply one stored policy now, pruning afterwards. Returns the Operation id.
pub async fn run_policy(ctx: &Arc<AppContext>, policy_id: u64) -> Result<JobId> {
    let policy = ctx.policies.get(policy_id)?;
    let options = policy.forget_options(&platform::hostname(), true);
    start_forget(ctx, policy.repository_id, options, Some(policy.id)).await
}
