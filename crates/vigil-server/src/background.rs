//! Periodic control-plane work: task reconciliation and scheduled policies.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use vigil_core::app::{AppContext, scheduler};
use vigil_core::commands::check::run_check_all;
use vigil_core::commands::policy::run_scheduled_policies;
use vigil_core::error::Result;

/// Start every background loop on the context's tracker so shutdown waits
/// for them.
pub fn spawn_all(ctx: &Arc<AppContext>) -> Result<()> {
    let schedule = &ctx.config.schedule;
    let reconcile_every = schedule.reconcile_every()?;
    ctx.spawn(reconcile_loop(Arc::clone(ctx), reconcile_every));

    if schedule.policies_enabled {
        let every = schedule.policies_every()?;
        ctx.spawn(policy_loop(Arc::clone(ctx), every, schedule.jitter_seconds));
    } else {
        info!("scheduled policies disabled");
    }
    Ok(())
}

async fn reconcile_loop(ctx: Arc<AppContext>, every: Duration) {
    let shutdown = ctx.shutdown_token();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match ctx.reconcile_tasks() {
            Ok(report) => debug!(
                interrupted = report.interrupted.len(),
                completed = report.completed.len(),
                "reconciliation sweep done"
            ),
            Err(e) => warn!(error = %e, "reconciliation sweep failed"),
        }
    }
    debug!("reconcile loop stopped");
}

async fn policy_loop(ctx: Arc<AppContext>, every: Duration, jitter_seconds: u64) {
    let shutdown = ctx.shutdown_token();
    loop {
        let next = scheduler::next_run_in(every, jitter_seconds, std::time::Instant::now());
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(Instant::from_std(next)) => {}
        }
        run_policies_once(&ctx).await;
    }
    debug!("policy loop stopped");
}

/// One scheduled tick: apply every policy, then check every repository when
/// `schedule.auto_check` is set.
pub async fn run_policies_once(ctx: &Arc<AppContext>) {
    match run_scheduled_policies(ctx).await {
        Ok(report) => info!(
            log_id = report.log_id,
            applied = report.applied,
            failed = report.failed.len(),
            removed = report.removed,
            "scheduled policy run finished"
        ),
        Err(e) => warn!(error = %e, "scheduled policy run failed"),
    }

    if ctx.config.schedule.auto_check {
        for (repo_id, outcome) in run_check_all(ctx).await {
            match outcome {
                Ok(op_id) => info!(repo_id, op_id, "automatic check started"),
                Err(e) => warn!(repo_id, error = %e, "automatic check not started"),
            }
        }
    }
}
