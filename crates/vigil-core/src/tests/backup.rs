use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::app::AppContext;
use crate::commands::backup::{BackupOptions, run_backup};
use crate::commands::restore::{RestoreOptions, run_restore};
use crate::error::VigilError;
use crate::lifecycle::{ChannelSink, ClientMessage, ErrorPhase, JobStatus, SinkFrame, Task, TaskKind};
use crate::testutil::{MAIN_REPO, MAIN_URL, test_context, wait_for_task, wait_for_unlocked};

fn backup_of(path: &str) -> BackupOptions {
    BackupOptions {
        repository_id: MAIN_REPO,
        path: path.into(),
        host: Some("web1".into()),
        ..Default::default()
    }
}

/// Wait until the task, its lock and its backup flag are all gone.
async fn settle(ctx: &AppContext, id: u64, path: &str) -> Task {
    let task = wait_for_task(ctx, id).await;
    wait_for_unlocked(ctx).await;
    for _ in 0..500 {
        if !ctx.backup_guard.is_running(MAIN_REPO, path) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backup flag for {path} was not cleared");
}

async fn drain_until_close(mut rx: mpsc::UnboundedReceiver<SinkFrame>) -> Vec<ClientMessage> {
    let mut messages = Vec::new();
    let collect = async {
        while let Some(frame) = rx.recv().await {
            match frame {
                SinkFrame::Text(text) => messages.push(serde_json::from_str(&text).unwrap()),
                SinkFrame::Close(_) => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("stream did not close");
    messages
}

#[tokio::test]
async fn backup_runs_to_completion() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/a.txt", 100);
    engine.add_source_file("/data/sub/b.txt", 200);
    engine.add_source_file("/etc/hosts", 50);

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let task = settle(&ctx, id, "/data").await;

    assert_eq!(task.status, JobStatus::End);
    assert_eq!(task.kind, TaskKind::Backup);
    assert_eq!(task.path, "/data");
    assert!(task.name.starts_with("backup_main_"));
    assert!(task.parent_id.is_none());
    let summary = task.summary.unwrap();
    assert_eq!(summary.files_new, 2);
    assert_eq!(summary.total_bytes_processed, 300);
    let ids = engine.snapshot_ids(MAIN_URL);
    assert_eq!(ids.len(), 1);
    assert_eq!(summary.snapshot_id, ids[0].to_hex());
    let progress = task.progress.unwrap();
    assert_eq!(progress.percent_done, 1.0);
    assert_eq!(task.scanner.unwrap().total_files, 2);
    assert_eq!(engine.lock_count(MAIN_URL), 0);
}

#[tokio::test]
async fn second_backup_uses_the_previous_snapshot_as_parent() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/a.txt", 100);
    engine.add_source_file("/data/b.txt", 100);

    let first = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let first = settle(&ctx, first, "/data").await;
    engine.add_source_file("/data/b.txt", 150);

    let second = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let second = settle(&ctx, second, "/data").await;

    let parent = first.summary.unwrap().snapshot_id;
    assert_eq!(second.parent_id.as_deref(), Some(parent.as_str()));
    let summary = second.summary.unwrap();
    assert_eq!(summary.files_unmodified, 1);
    assert_eq!(summary.files_changed, 1);
}

#[tokio::test]
async fn same_path_cannot_run_twice() {
    let (ctx, engine) = test_context().await;
    for i in 0..5 {
        engine.add_source_file(&format!("/data/{i}"), 10);
    }
    engine.add_source_file("/home/u/notes", 10);
    engine.set_item_delay(Duration::from_millis(30));

    let first = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let err = run_backup(&ctx, backup_of("/data")).await.unwrap_err();
    assert!(matches!(&err, VigilError::BackupRunning { repo_id: MAIN_REPO, path } if path == "/data"));
    assert!(err.is_acquisition());

    // Another path of the same repository shares the lock.
    let other = run_backup(&ctx, backup_of("/home")).await.unwrap();

    assert_eq!(wait_for_task(&ctx, first).await.status, JobStatus::End);
    assert_eq!(wait_for_task(&ctx, other).await.status, JobStatus::End);
    settle(&ctx, first, "/data").await;

    let again = run_backup(&ctx, backup_of("/data")).await.unwrap();
    assert_eq!(settle(&ctx, again, "/data").await.status, JobStatus::End);
}

#[tokio::test]
async fn unreadable_file_fails_the_task_but_keeps_the_snapshot() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/ok", 10);
    engine.add_source_file("/data/secret", 10);
    engine.make_unreadable("/data/secret");

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let task = settle(&ctx, id, "/data").await;

    assert_eq!(task.status, JobStatus::Error);
    assert_eq!(task.archival_errors.len(), 2);
    assert_eq!(task.archival_errors[0].item, "/data/secret");
    assert_eq!(task.archival_errors[0].during, ErrorPhase::Archival);
    let last = task.archival_errors.last().unwrap();
    assert_eq!(last.during, ErrorPhase::Backup);
    assert_eq!(last.error, "at least one source file could not be read");
    assert!(task.summary.is_some());
    assert_eq!(engine.snapshot_ids(MAIN_URL).len(), 1);
}

#[tokio::test]
async fn scan_error_marks_the_task_failed() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/ok", 10);
    engine.add_source_file("/data/hidden", 10);
    engine.fail_scan("/data/hidden");

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let task = settle(&ctx, id, "/data").await;
    assert_eq!(task.status, JobStatus::Error);
    assert_eq!(task.scanner_error.unwrap().item, "/data/hidden");
}

#[tokio::test]
async fn aborted_scan_fails_the_whole_backup() {
    let (ctx, engine) = test_context().await;
    for i in 0..20 {
        engine.add_source_file(&format!("/data/{i}"), 10);
    }
    engine.set_item_delay(Duration::from_millis(20));
    engine.abort_scan("/data");

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let task = settle(&ctx, id, "/data").await;
    assert_eq!(task.status, JobStatus::Error);
    let scanner = task.scanner_error.unwrap();
    assert_eq!(scanner.during, ErrorPhase::Scan);
    assert!(scanner.error.contains("cannot open /data"));
    assert!(task.summary.is_none());
    assert!(engine.snapshot_ids(MAIN_URL).is_empty());
}

#[tokio::test]
async fn dry_run_writes_no_snapshot() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/a", 10);
    let id = run_backup(
        &ctx,
        BackupOptions {
            dry_run: true,
            ..backup_of("/data")
        },
    )
    .await
    .unwrap();
    let task = settle(&ctx, id, "/data").await;
    assert_eq!(task.status, JobStatus::End);
    let summary = task.summary.unwrap();
    assert!(summary.dry_run);
    assert!(summary.snapshot_id.is_empty());
    assert!(engine.snapshot_ids(MAIN_URL).is_empty());
}

#[tokio::test]
async fn rejected_backups_leave_nothing_behind() {
    let (ctx, engine) = test_context().await;

    let err = run_backup(&ctx, backup_of("  ")).await.unwrap_err();
    assert!(matches!(err, VigilError::InvalidArgument(m) if m == "please specify a path to back up"));

    let err = run_backup(
        &ctx,
        BackupOptions {
            repository_id: 99,
            ..backup_of("/data")
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, VigilError::RepoNotFound(99)));

    engine
        .plant_lock(MAIN_URL, true, chrono::Duration::minutes(1))
        .unwrap();
    let err = run_backup(&ctx, backup_of("/data")).await.unwrap_err();
    assert!(matches!(err, VigilError::Locked(_)));
    assert!(!ctx.backup_guard.is_running(MAIN_REPO, "/data"));
    assert!(ctx.locks.is_empty());
    assert!(ctx.tasks.search(&Default::default()).unwrap().is_empty());
}

#[tokio::test]
async fn attached_client_sees_status_and_one_summary() {
    let (ctx, engine) = test_context().await;
    for i in 0..6 {
        engine.add_source_file(&format!("/data/{i}"), 1000);
    }
    engine.set_item_delay(Duration::from_millis(15));

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    let (sink, rx) = ChannelSink::new();
    ctx.tasks.live().attach(id, sink).unwrap();

    let messages = drain_until_close(rx).await;
    let statuses = messages
        .iter()
        .filter(|m| matches!(m, ClientMessage::Status(_)))
        .count();
    assert!(statuses >= 1);
    assert_eq!(messages.iter().filter(|m| m.is_summary()).count(), 1);
    assert!(matches!(messages.last(), Some(ClientMessage::Status(s)) if s.percent_done == 1.0));
    settle(&ctx, id, "/data").await;
}

#[tokio::test]
async fn shutdown_cancels_running_backup() {
    let (ctx, engine) = test_context().await;
    for i in 0..50 {
        engine.add_source_file(&format!("/data/{i}"), 10);
    }
    engine.set_item_delay(Duration::from_millis(20));

    let id = run_backup(&ctx, backup_of("/data")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.shutdown().await;

    let task = ctx.tasks.get(id).unwrap();
    assert_eq!(task.status, JobStatus::Error);
    assert!(ctx.locks.is_empty());
    assert!(!ctx.tasks.live().contains(id));
    assert!(engine.snapshot_ids(MAIN_URL).is_empty());
}

async fn backed_up(ctx: &Arc<AppContext>) -> String {
    let id = run_backup(ctx, backup_of("/data")).await.unwrap();
    settle(ctx, id, "/data").await.summary.unwrap().snapshot_id
}

#[tokio::test]
async fn restore_latest_snapshot() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/a", 100);
    engine.add_source_file("/data/b", 300);
    let snapshot = backed_up(&ctx).await;

    let id = run_restore(
        &ctx,
        RestoreOptions {
            repository_id: MAIN_REPO,
            snapshot_id: "latest".into(),
            target: "/restore".into(),
            verify: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let task = wait_for_task(&ctx, id).await;
    wait_for_unlocked(&ctx).await;

    assert_eq!(task.status, JobStatus::End);
    assert_eq!(task.kind, TaskKind::Restore);
    assert_eq!(task.parent_id.as_deref(), Some(snapshot.as_str()));
    assert!(task.name.starts_with("restore_main_"));
    let summary = task.summary.unwrap();
    assert_eq!(summary.total_files_processed, 2);
    assert_eq!(summary.total_bytes_processed, 400);
    assert_eq!(engine.restored("/restore"), vec!["/restore/data/a", "/restore/data/b"]);
}

#[tokio::test]
async fn restore_by_prefix_with_include() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/keep.txt", 10);
    engine.add_source_file("/data/skip.txt", 10);
    let snapshot = backed_up(&ctx).await;

    let id = run_restore(
        &ctx,
        RestoreOptions {
            repository_id: MAIN_REPO,
            snapshot_id: snapshot[..8].into(),
            target: "/out/".into(),
            include: vec!["keep.txt".into()],
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(wait_for_task(&ctx, id).await.status, JobStatus::End);
    assert_eq!(engine.restored("/out/"), vec!["/out/data/keep.txt"]);
}

#[tokio::test]
async fn unwritable_file_fails_the_restore() {
    let (ctx, engine) = test_context().await;
    engine.add_source_file("/data/a", 10);
    engine.add_source_file("/data/b", 10);
    backed_up(&ctx).await;
    engine.make_unreadable("/data/b");

    let id = run_restore(
        &ctx,
        RestoreOptions {
            repository_id: MAIN_REPO,
            snapshot_id: "latest".into(),
            target: "/restore".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let task = wait_for_task(&ctx, id).await;
    assert_eq!(task.status, JobStatus::Error);
    assert_eq!(task.restore_errors.len(), 1);
    assert_eq!(task.restore_errors[0].during, ErrorPhase::Restore);
    assert_eq!(task.restore_errors[0].item, "/data/b");
}

#[tokio::test]
async fn restore_arguments_are_validated() {
    let (ctx, _engine) = test_context().await;
    let base = RestoreOptions {
        repository_id: MAIN_REPO,
        snapshot_id: "latest".into(),
        target: "/restore".into(),
        ..Default::default()
    };

    let cases = [
        (
            RestoreOptions {
                snapshot_id: String::new(),
                ..base.clone()
            },
            "please specify a snapshot to restore",
        ),
        (
            RestoreOptions {
                target: " ".into(),
                ..base.clone()
            },
            "please specify a target directory",
        ),
        (
            RestoreOptions {
                include: vec!["a".into()],
                exclude: vec!["b".into()],
                ..base.clone()
            },
            "exclude and include patterns are mutually exclusive",
        ),
    ];
    for (options, message) in cases {
        let err = run_restore(&ctx, options).await.unwrap_err();
        assert!(matches!(&err, VigilError::InvalidArgument(m) if m == message), "{err}");
    }

    let err = run_restore(&ctx, base).await.unwrap_err();
    assert!(matches!(err, VigilError::SnapshotNotFound(_)));
    assert!(ctx.locks.is_empty());
}
