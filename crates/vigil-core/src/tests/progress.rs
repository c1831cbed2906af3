use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{ArchiveEvent, ItemAction, ScanEvent};
use crate::lifecycle::{
    ChannelSink, ClientMessage, JobStatus, LiveRegistry, MemoryStore, SinkFrame, SummaryOutput,
    Task, TaskKind, TaskLive, TaskService,
};
use crate::progress::{
    Counts, OperationLog, ProgressEvent, ReporterSettings, TaskReporter, Throttle, Weights,
    format_bytes, format_duration, percent_done, seconds_remaining,
};

#[test]
fn percent_done_with_equal_weights() {
    let total = Counts::new(10, 1000);
    let done = Counts::new(5, 500);
    assert!((percent_done(total, done, Weights::BACKUP) - 0.50).abs() < 1e-9);
}

#[test]
fn percent_done_with_restore_weights() {
    let total = Counts::new(10, 1000);
    let done = Counts::new(10, 0);
    let pct = percent_done(total, done, Weights::RESTORE);
    assert!((pct - 40.0 / 1040.0).abs() < 1e-9);
    assert!((pct - 0.0385).abs() < 1e-4);
}

#[test]
fn percent_done_is_zero_without_totals_and_clamped() {
    assert_eq!(percent_done(Counts::default(), Counts::new(3, 3), Weights::BACKUP), 0.0);
    assert_eq!(percent_done(Counts::new(1, 10), Counts::new(2, 20), Weights::BACKUP), 1.0);
}

#[test]
fn remaining_time_extrapolates_linearly() {
    assert_eq!(seconds_remaining(Duration::from_secs(10), 1000, 250), 30);
    assert_eq!(seconds_remaining(Duration::from_secs(10), 1000, 0), 0);
    assert_eq!(seconds_remaining(Duration::from_secs(10), 1000, 1000), 0);
}

#[test]
fn burst_of_updates_yields_one_message() {
    let mut throttle = Throttle::new(Duration::from_secs(1));
    let start = Instant::now();
    let delivered = (0..100)
        .filter(|i| throttle.allow_at(start + Duration::from_micros(i * 100), false))
        .count();
    assert_eq!(delivered, 1);
}

#[test]
fn forced_updates_always_pass() {
    let mut throttle = Throttle::new(Duration::from_secs(1));
    let now = Instant::now();
    assert!(throttle.allow_at(now, false));
    assert!(!throttle.allow_at(now + Duration::from_millis(10), false));
    assert!(throttle.allow_at(now + Duration::from_millis(20), true));
    assert!(!throttle.allow_at(now + Duration::from_millis(900), false));
    assert!(throttle.allow_at(now + Duration::from_millis(1020), false));
}

#[test]
fn zero_pause_never_suppresses() {
    let mut throttle = Throttle::new(Duration::ZERO);
    let now = Instant::now();
    assert!((0..10).all(|_| throttle.allow_at(now, false)));
}

#[test]
fn human_formatting() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(1536), "1.50 KiB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    assert_eq!(format_duration(Duration::from_secs(75)), "1:15");
    assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
}

fn decode(rx: &mut mpsc::UnboundedReceiver<SinkFrame>) -> Vec<ClientMessage> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let SinkFrame::Text(text) = frame {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

fn task_service() -> TaskService {
    TaskService::new(Arc::new(MemoryStore::<Task>::new()), Arc::new(LiveRegistry::new("tasks")))
}

fn settings(max_errors: usize) -> ReporterSettings {
    ReporterSettings {
        tick: Duration::from_millis(10),
        min_update_pause: Duration::ZERO,
        max_errors,
        weights: Weights::BACKUP,
    }
}

#[tokio::test]
async fn reporter_caps_recorded_errors_but_counts_all() {
    let tasks = task_service();
    let task = tasks.create(Task::default()).unwrap();
    let rebind = tasks.live().open(task.id, TaskLive::default());
    let (sink, mut rx) = ChannelSink::new();
    tasks.live().attach(task.id, sink).unwrap();

    let (mut reporter, progress) = TaskReporter::new(task.id, TaskKind::Backup, tasks.clone(), settings(3));
    for i in 0..5 {
        progress.archive(ArchiveEvent::Error {
            item: format!("/data/{i}"),
            message: "open: permission denied".into(),
        });
    }
    drop(progress);
    reporter.run(&CancellationToken::new(), rebind).await;

    assert_eq!(reporter.error_count(), 5);
    assert_eq!(tasks.get(task.id).unwrap().archival_errors.len(), 3);

    let status = reporter.finish(SummaryOutput::default()).unwrap();
    assert_eq!(status, JobStatus::Error);
    assert!(!tasks.live().contains(task.id));

    let messages = decode(&mut rx);
    let errors = messages.iter().filter(|m| matches!(m, ClientMessage::Error(_))).count();
    assert_eq!(errors, 5, "every error is streamed even past the cap");
}

#[tokio::test]
async fn reporter_finish_forces_completion() {
    let tasks = task_service();
    let task = tasks.create(Task::default()).unwrap();
    let rebind = tasks.live().open(task.id, TaskLive::default());
    let (sink, mut rx) = ChannelSink::new();
    tasks.live().attach(task.id, sink).unwrap();

    let (mut reporter, progress) = TaskReporter::new(task.id, TaskKind::Backup, tasks.clone(), settings(20));
    progress.scan(ScanEvent::Finished { files: 4, bytes: 4000 });
    progress.archive(ArchiveEvent::Processed { files: 2, bytes: 1000 });
    progress.archive(ArchiveEvent::ItemCompleted {
        item: "/data/a".into(),
        action: ItemAction::New,
        data_size: 500,
        metadata_size: 0,
        duration: Duration::from_millis(3),
    });
    progress.send(ProgressEvent::Force);
    drop(progress);
    reporter.run(&CancellationToken::new(), rebind).await;

    let mid = reporter.status();
    assert_eq!(mid.total_files, 4);
    assert!((mid.percent_done - (1002.0 / 4004.0)).abs() < 1e-9);

    let status = reporter
        .finish(SummaryOutput {
            snapshot_id: "abc".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(status, JobStatus::End);

    let stored = tasks.get(task.id).unwrap();
    let progress = stored.progress.unwrap();
    assert_eq!(progress.percent_done, 1.0);
    assert_eq!(progress.bytes_done, progress.total_bytes);
    assert_eq!(stored.scanner.unwrap().total_files, 4);
    assert_eq!(stored.summary.unwrap().snapshot_id, "abc");

    let messages = decode(&mut rx);
    assert_eq!(messages.iter().filter(|m| m.is_summary()).count(), 1);
    assert!(matches!(messages.last(), Some(ClientMessage::Status(s)) if s.percent_done == 1.0));
}

#[tokio::test]
async fn scan_error_marks_task_failed() {
    let tasks = task_service();
    let task = tasks.create(Task::default()).unwrap();
    let rebind = tasks.live().open(task.id, TaskLive::default());

    let (mut reporter, progress) = TaskReporter::new(task.id, TaskKind::Backup, tasks.clone(), settings(20));
    progress.scan(ScanEvent::Error {
        item: "/data/secret".into(),
        message: "lstat: permission denied".into(),
    });
    drop(progress);
    reporter.run(&CancellationToken::new(), rebind).await;

    assert!(tasks.get(task.id).unwrap().scanner_error.is_some());
    assert_eq!(reporter.finish(SummaryOutput::default()).unwrap(), JobStatus::Error);
}

#[tokio::test]
async fn rebind_sends_current_status() {
    let tasks = task_service();
    let task = tasks.create(Task::default()).unwrap();
    let rebind = tasks.live().open(task.id, TaskLive::default());
    let settings = ReporterSettings {
        tick: Duration::from_secs(3600),
        ..settings(20)
    };
    let (mut reporter, progress) = TaskReporter::new(task.id, TaskKind::Backup, tasks.clone(), settings);
    let cancel = CancellationToken::new();

    let live = Arc::clone(tasks.live());
    let id = task.id;
    let stopper = cancel.clone();
    let attach = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (sink, rx) = ChannelSink::new();
        live.attach(id, sink).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();
        rx
    });
    reporter.run(&cancel, rebind).await;
    drop(progress);

    let mut rx = attach.await.unwrap();
    let messages = decode(&mut rx);
    assert!(messages.iter().any(|m| matches!(m, ClientMessage::Status(_))));
    let live_progress = tasks.live().with_state(id, |s| s.progress.clone()).flatten();
    assert!(live_progress.is_some());
}

#[test]
fn operation_log_limits_and_clears() {
    let live = Arc::new(LiveRegistry::new("operations"));
    let _rebind = live.open(1, ());
    let (sink, mut rx) = ChannelSink::new();
    live.attach(1, sink).unwrap();
    let mut log = OperationLog::new(Arc::clone(&live), 1, 2, Duration::ZERO);

    log.append(crate::lifecycle::LogLevel::Info, "start");
    for i in 0..5 {
        log.append_limited(crate::lifecycle::LogLevel::Error, format!("failure {i}"));
    }
    log.progress("1/3 snapshots removed");
    log.progress("2/3 snapshots removed");

    let texts: Vec<&str> = log.lines().iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["start", "failure 0", "failure 1", "2/3 snapshots removed"]);
    assert!(log.has_errors());

    log.reset_limit();
    assert!(log.append_limited(crate::lifecycle::LogLevel::Warning, "after reset"));

    let sent = decode(&mut rx);
    assert_eq!(sent.len(), 6);
}
