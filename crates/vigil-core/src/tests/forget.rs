use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::commands::delete::delete_snapshots;
use crate::commands::forget::{ForgetOptions, run_forget, run_forget_sync};
use crate::engine::MemoryEngine;
use crate::error::VigilError;
use crate::lifecycle::{JobStatus, LogLevel, Operation, OperationKind};
use crate::progress::SharedLog;
use crate::retention::{ExpirePolicy, KeepCount, RetentionKind, SnapshotFilter};
use crate::testutil::{MAIN_REPO, MAIN_URL, snapshot, test_context, wait_for_operation, wait_for_unlocked};
use vigil_types::snapshot_id::SnapshotId;

/// `n` hourly snapshots of `host:/data`, newest first in the returned ids.
fn seed(engine: &MemoryEngine, host: &str, n: i64) -> Vec<SnapshotId> {
    let base = Utc::now() - Duration::days(1);
    let mut ids: Vec<SnapshotId> = (0..n)
        .map(|i| {
            let snap = snapshot(host, "/data", base + Duration::hours(i));
            let id = snap.id;
            engine.insert_snapshot(MAIN_URL, snap).unwrap();
            id
        })
        .collect();
    ids.reverse();
    ids
}

fn keep_last(n: u32) -> ForgetOptions {
    ForgetOptions {
        policy: ExpirePolicy::single(RetentionKind::Last, KeepCount::Count(n)),
        ..Default::default()
    }
}

fn texts(op: &Operation) -> Vec<&str> {
    op.logs.iter().map(|l| l.text.as_str()).collect()
}

fn scratch_log(ctx: &AppContext) -> SharedLog {
    ctx.open_log_stream().0.shared()
}

async fn forget_op(ctx: &Arc<AppContext>, options: ForgetOptions) -> Operation {
    let id = run_forget(ctx, MAIN_REPO, options).await.unwrap();
    let op = wait_for_operation(ctx, id).await;
    wait_for_unlocked(ctx).await;
    op
}

#[tokio::test]
async fn policy_is_applied_per_group() {
    let (ctx, engine) = test_context().await;
    let web1 = seed(&engine, "web1", 5);
    let web2 = seed(&engine, "web2", 2);

    let op = forget_op(&ctx, keep_last(2)).await;
    assert_eq!(op.status, JobStatus::End);
    assert_eq!(op.kind, OperationKind::Forget);
    let lines = texts(&op);
    assert!(lines.contains(&"snapshots for host [web1], paths [/data]: keep 2, remove 3"));
    assert!(lines.contains(&"snapshots for host [web2], paths [/data]: keep 2, remove 0"));
    let keep_line = format!("keep {} (last #1)", web1[0]);
    assert!(lines.contains(&keep_line.as_str()));
    assert_eq!(lines.last(), Some(&"3 snapshots have been removed"));

    let left = engine.snapshot_ids(MAIN_URL);
    assert_eq!(left.len(), 4);
    assert!(left.contains(&web1[0]) && left.contains(&web1[1]));
    assert!(!left.contains(&web1[4]));
    assert!(web2.iter().all(|id| left.contains(id)));
}

#[tokio::test]
async fn filter_limits_the_candidates() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 3);
    seed(&engine, "web2", 3);

    let op = forget_op(
        &ctx,
        ForgetOptions {
            filter: SnapshotFilter {
                hosts: vec!["web2".into()],
                ..Default::default()
            },
            ..keep_last(1)
        },
    )
    .await;
    assert_eq!(op.status, JobStatus::End);
    assert_eq!(engine.snapshot_ids(MAIN_URL).len(), 4);
}

#[tokio::test]
async fn nothing_to_remove_is_not_an_error() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 2);
    let op = forget_op(&ctx, keep_last(5)).await;
    assert_eq!(op.status, JobStatus::End);
    assert_eq!(texts(&op).last(), Some(&"no snapshots were removed"));
}

#[tokio::test]
async fn empty_policy_removes_nothing() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 3);
    let op = forget_op(&ctx, ForgetOptions::default()).await;
    assert_eq!(op.status, JobStatus::End);
    assert_eq!(op.logs.len(), 1);
    assert_eq!(op.logs[0].level, LogLevel::Warning);
    assert_eq!(op.logs[0].text, "no policy was specified, no snapshots will be removed");
    assert_eq!(engine.snapshot_ids(MAIN_URL).len(), 3);
}

#[tokio::test]
async fn unmatched_filter_fails_the_operation() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 3);
    let op = forget_op(
        &ctx,
        ForgetOptions {
            filter: SnapshotFilter {
                paths: vec!["/nowhere".into()],
                ..Default::default()
            },
            ..keep_last(1)
        },
    )
    .await;
    assert_eq!(op.status, JobStatus::Error);
    assert_eq!(
        texts(&op).last(),
        Some(&"snapshot not found: 'no snapshot matches the given filter'")
    );
}

#[tokio::test]
async fn dry_run_only_reports() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 4);
    let op = forget_op(
        &ctx,
        ForgetOptions {
            dry_run: true,
            ..keep_last(1)
        },
    )
    .await;
    assert_eq!(op.status, JobStatus::End);
    assert_eq!(texts(&op).last(), Some(&"dry run: 3 snapshots would be removed"));
    assert_eq!(engine.snapshot_ids(MAIN_URL).len(), 4);
}

#[tokio::test]
async fn explicit_ids_skip_failures() {
    let (ctx, engine) = test_context().await;
    let ids = seed(&engine, "web1", 4);
    engine.fail_remove(ids[1]);

    let options = ForgetOptions {
        snapshot_ids: vec![ids[0].to_hex(), ids[1].to_hex(), ids[2].short()],
        ..Default::default()
    };
    let log = scratch_log(&ctx);
    let report = run_forget_sync(&ctx, MAIN_REPO, &options, &log).await.unwrap();

    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, ids[1]);
    assert!(!report.pruned);
    assert_eq!(engine.snapshot_ids(MAIN_URL), vec![ids[3], ids[1]]);
    let log = log.lock().unwrap();
    assert!(log.has_errors());
    assert_eq!(log.lines().last().unwrap().text, "2 snapshots have been removed");
    assert!(ctx.locks.is_empty());
}

#[tokio::test]
async fn unknown_explicit_id_aborts_before_removing() {
    let (ctx, engine) = test_context().await;
    let ids = seed(&engine, "web1", 2);
    let options = ForgetOptions {
        snapshot_ids: vec![ids[0].to_hex(), "ffffffffdeadbeef".into()],
        ..Default::default()
    };
    let err = run_forget_sync(&ctx, MAIN_REPO, &options, &scratch_log(&ctx))
        .await
        .unwrap_err();
    // A random id could start with this prefix, but not realistically.
    assert!(matches!(err, VigilError::SnapshotNotFound(_)));
    assert_eq!(engine.snapshot_ids(MAIN_URL).len(), 2);
}

#[tokio::test]
async fn policy_removal_stops_at_first_failure() {
    let (ctx, engine) = test_context().await;
    let ids = seed(&engine, "web1", 3);
    engine.fail_remove(ids[2]);

    let op = forget_op(&ctx, keep_last(1)).await;
    assert_eq!(op.status, JobStatus::Error);
    let expected = format!(
        "unable to remove {}: engine error: remove snapshot {}: permission denied",
        ids[2], ids[2]
    );
    assert!(texts(&op).contains(&expected.as_str()));
    assert!(engine.snapshot_ids(MAIN_URL).contains(&ids[2]));
}

#[tokio::test]
async fn forget_can_prune_afterwards() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 3);
    let op = forget_op(
        &ctx,
        ForgetOptions {
            prune: true,
            ..keep_last(1)
        },
    )
    .await;
    assert_eq!(op.status, JobStatus::End);
    let lines = texts(&op);
    assert!(lines.iter().any(|l| l.contains("max unused 5%")));
    assert_eq!(lines.last(), Some(&"removed 0 unused blobs, 0 B freed"));

    let log = scratch_log(&ctx);
    let report = run_forget_sync(
        &ctx,
        MAIN_REPO,
        &ForgetOptions {
            prune: true,
            ..keep_last(1)
        },
        &log,
    )
    .await
    .unwrap();
    // Nothing removed, so no prune.
    assert!(!report.pruned);
    assert_eq!(report.kept, 1);
}

#[tokio::test]
async fn forget_needs_the_exclusive_lock() {
    let (ctx, engine) = test_context().await;
    seed(&engine, "web1", 2);
    engine
        .plant_lock(MAIN_URL, false, chrono::Duration::minutes(1))
        .unwrap();
    let err = run_forget(&ctx, MAIN_REPO, keep_last(1)).await.unwrap_err();
    assert!(matches!(err, VigilError::Locked(_)));
    let err = run_forget_sync(&ctx, MAIN_REPO, &keep_last(1), &scratch_log(&ctx))
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::Locked(_)));
    assert!(ctx.operations.list(None).unwrap().is_empty());
}

#[tokio::test]
async fn parallel_delete_reports_progress() {
    let (ctx, engine) = test_context().await;
    let ids = seed(&engine, "web1", 10);
    let log = scratch_log(&ctx);
    let session = Arc::clone(&ctx.registry.get(MAIN_REPO).unwrap().session);

    let report = delete_snapshots(session, ids.clone(), 3, true, &CancellationToken::new(), &log)
        .await
        .unwrap();
    assert_eq!(report.removed.len(), 10);
    assert!(report.failed.is_empty());
    assert!(engine.snapshot_ids(MAIN_URL).is_empty());

    let log = log.lock().unwrap();
    assert_eq!(log.lines().len(), 1);
    assert_eq!(log.lines()[0].text, "10/10 snapshots removed");
}

#[tokio::test]
async fn unchecked_delete_limits_logged_failures() {
    let (ctx, engine) = test_context().await;
    let ids = seed(&engine, "web1", 30);
    for id in &ids {
        engine.fail_remove(*id);
    }
    let log = scratch_log(&ctx);
    let session = Arc::clone(&ctx.registry.get(MAIN_REPO).unwrap().session);

    let report = delete_snapshots(session, ids, 4, false, &CancellationToken::new(), &log)
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 30);
    let log = log.lock().unwrap();
    let errors = log.lines().iter().filter(|l| l.level == LogLevel::Error).count();
    assert_eq!(errors, ctx.settings.max_log_errors);
}
