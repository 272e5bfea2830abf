mod common;

use common::*;
use ghupload_lib::cli::FsDisposer;
use ghupload_lib::core::ErrorKind;
use ghupload_lib::models::Classification;
use ghupload_lib::remote::RemoteOp;
use ghupload_lib::{
    ConcurrencyGate, DisposalMode, MemoryRemote, RunStatus, TransferMode, TransferOutcome,
    UploadError, UploadEvent,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn three_files() -> tempfile::TempDir {
    local_tree(&[("a.txt", "alpha"), ("b.txt", "bravo"), ("sub/c.txt", "charlie")])
}

#[tokio::test]
async fn test_commits_each_file_and_writes_session_log() {
    let dir = three_files();
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(test_config(dir.path(), TransferMode::Incremental), &remote);

    let (report, events) = run_once(&engine).await;

    assert_eq!(report.result.status, RunStatus::Completed);
    assert_eq!(report.result.committed, 3);
    assert_eq!(report.result.bytes_transferred, 17);
    assert_eq!(
        report.committed_paths(),
        vec!["docs/a.txt", "docs/b.txt", "docs/sub/c.txt"]
    );
    assert_eq!(remote.file_text("docs/sub/c.txt").as_deref(), Some("charlie"));
    // 三个文件 + 一次日志提交
    assert_eq!(remote.commit_count(), 4);
    assert_eq!(remote.head_message(), "chore: update files.log [skip ci]");

    let log = remote.file_text("docs/files.log").unwrap();
    assert!(log.starts_with("# 📋 Upload Log — `me/files` (`main`)"));
    assert!(log.contains("| ✅ | `docs/b.txt` | 5 B |"));
    assert_eq!(done_count(&events), 1);
}

#[tokio::test]
async fn test_commit_message_template() {
    let dir = local_tree(&[("a.txt", "a"), ("b.txt", "b")]);
    let remote = Arc::new(MemoryRemote::new());
    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.commit_message = Some("add {filepath} ({index}/{total})".into());
    cfg.write_session_log = false;

    run_once(&engine(cfg, &remote)).await;

    assert_eq!(remote.head_message(), "add docs/b.txt (2/2)");
    assert!(remote.file("docs/files.log").is_none());
}

#[tokio::test]
async fn test_oversized_file_is_skipped_without_write() {
    let dir = local_tree(&[("a.txt", "alpha"), ("b.txt", "bravo")]);
    sparse_file(dir.path(), "big.bin", 150 * 1024 * 1024);
    let remote = Arc::new(MemoryRemote::new());

    let (report, _) = run_once(&engine(
        test_config(dir.path(), TransferMode::Incremental),
        &remote,
    ))
    .await;

    assert_eq!(report.result.committed, 2);
    assert_eq!(report.result.skipped, 1);
    assert_eq!(
        report.outcome_of("docs/big.bin"),
        Some(&TransferOutcome::Skipped("too-large".into()))
    );
    assert!(remote.file("docs/big.bin").is_none());
    // 2 个文件 + 日志
    assert_eq!(remote.count(RemoteOp::WriteContent), 3);
    let log = remote.file_text("docs/files.log").unwrap();
    assert!(log.contains("| ⏭️ | `docs/big.bin` | 150.0 MB |"));
}

#[tokio::test]
async fn test_cancel_after_second_write() {
    let dir = local_tree(&[
        ("1.txt", "1"),
        ("2.txt", "2"),
        ("3.txt", "3"),
        ("4.txt", "4"),
        ("5.txt", "5"),
    ]);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(test_config(dir.path(), TransferMode::Incremental), &remote);

    let gate = ConcurrencyGate::new(Duration::from_millis(5));
    let handle = gate.handle();
    let writes = Arc::new(AtomicUsize::new(0));
    let counter = writes.clone();
    remote.on_success(move |op| {
        if op == RemoteOp::WriteContent && counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
            handle.cancel();
        }
    });

    let (report, events) = run_with_gate(&engine, &gate).await;

    assert_eq!(report.result.status, RunStatus::Cancelled);
    assert_eq!(report.result.committed, 2);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(remote.count(RemoteOp::WriteContent), 2);
    assert!(remote.file("docs/files.log").is_none());
    assert!(matches!(events.last(), Some(UploadEvent::Done(_))));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_conflict_refetches_hash_and_retries() {
    let dir = local_tree(&[("a.txt", "mine")]);
    let remote = Arc::new(MemoryRemote::new().with_file("docs/a.txt", "theirs"));

    // 第一次读取 hash 之后，另一个客户端修改了文件
    let raced = Arc::new(AtomicBool::new(false));
    let other = remote.clone();
    let flag = raced.clone();
    remote.on_success(move |op| {
        if op == RemoteOp::FetchHash && !flag.swap(true, Ordering::SeqCst) {
            other.put_file("docs/a.txt", "theirs v2");
        }
    });

    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.write_session_log = false;
    let (report, events) = run_once(&engine(cfg, &remote)).await;

    assert_eq!(report.result.committed, 1);
    assert_eq!(remote.file_text("docs/a.txt").as_deref(), Some("mine"));
    assert_eq!(remote.count(RemoteOp::FetchHash), 2);
    assert_eq!(remote.count(RemoteOp::WriteContent), 2);
    assert!(log_messages(&events).iter().any(|m| m.contains("Conflict")));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = local_tree(&[("a.txt", "a")]);
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::FetchHash, ErrorKind::RateLimited, 2);
    remote.fail_next(RemoteOp::WriteContent, ErrorKind::ServerError, 2);
    remote.fail_next(RemoteOp::FetchHash, ErrorKind::Network, 1);

    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.write_session_log = false;
    let (report, events) = run_once(&engine(cfg, &remote)).await;

    assert_eq!(report.result.committed, 1);
    assert_eq!(report.result.failed, 0);
    assert_eq!(remote.count(RemoteOp::WriteContent), 3);
    let logs = log_messages(&events);
    assert!(logs.iter().any(|m| m.contains("RateLimited")));
    assert!(logs.iter().any(|m| m.contains("ServerError")));
}

#[tokio::test]
async fn test_client_error_fails_file_and_run_continues() {
    let dir = local_tree(&[("a.txt", "a"), ("b.txt", "b")]);
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::WriteContent, ErrorKind::Client, 1);

    let (report, _) = run_once(&engine(
        test_config(dir.path(), TransferMode::Incremental),
        &remote,
    ))
    .await;

    match report.outcome_of("docs/a.txt") {
        Some(TransferOutcome::Failed(detail)) => assert!(detail.starts_with("HTTP 422")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(report.outcome_of("docs/b.txt").unwrap().is_committed());
    assert_eq!(report.result.classification(), Classification::Partial);
    // 失败的文件同样出现在日志中
    let log = remote.file_text("docs/files.log").unwrap();
    assert!(log.contains("| ❌ | `docs/a.txt` |"));
    assert!(log.contains("| ❌ Failed | 1 |"));
}

#[tokio::test]
async fn test_attempt_budget_exhaustion_gives_up() {
    let dir = local_tree(&[("a.txt", "a")]);
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::WriteContent, ErrorKind::ServerError, 7);

    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.write_session_log = false;
    let (report, _) = run_once(&engine(cfg, &remote)).await;

    assert_eq!(
        report.outcome_of("docs/a.txt"),
        Some(&TransferOutcome::Failed("gave-up".into()))
    );
    assert_eq!(remote.count(RemoteOp::WriteContent), 7);
    assert_eq!(report.result.classification(), Classification::Failure);
}

#[tokio::test]
async fn test_rerun_appends_log_under_single_header() {
    let dir = local_tree(&[("a.txt", "a"), ("b.txt", "b")]);
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine(test_config(dir.path(), TransferMode::Incremental), &remote);

    let (first, _) = run_once(&engine).await;
    let (second, _) = run_once(&engine).await;

    assert_eq!(first.result.committed, 2);
    assert_eq!(second.result.committed, 2);
    assert_eq!(second.result.failed, 0);
    assert_eq!(remote.file_text("docs/a.txt").as_deref(), Some("a"));

    let log = remote.file_text("docs/files.log").unwrap();
    assert_eq!(log.matches("# 📋 Upload Log").count(), 1);
    assert_eq!(log.matches("## 🚀 Session").count(), 2);
}

#[tokio::test]
async fn test_dry_run_makes_no_remote_calls() {
    let dir = three_files();
    let remote = Arc::new(MemoryRemote::new());
    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.dry_run = true;

    let (report, _) = run_once(&engine(cfg, &remote)).await;

    assert!(remote.calls().is_empty());
    assert_eq!(report.result.committed, 3);
    assert!(report.result.dry_run);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.outcome == TransferOutcome::DryRun));
}

#[tokio::test]
async fn test_disposal_after_commit_only() {
    let dir = local_tree(&[("a.txt", "a"), ("b.txt", "b")]);
    let recycle = setup_temp_dir();
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::WriteContent, ErrorKind::Client, 1);

    let mut cfg = test_config(dir.path(), TransferMode::Incremental);
    cfg.disposal = DisposalMode::Recycle;
    cfg.write_session_log = false;
    let engine = engine(cfg, &remote).with_disposer(Arc::new(FsDisposer::new(
        DisposalMode::Recycle,
        recycle.path(),
    )));

    let (report, _) = run_once(&engine).await;

    assert_eq!(report.result.deleted, 1);
    assert!(dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.txt").exists());
    assert_eq!(std::fs::read_dir(recycle.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    let dir = local_tree(&[("a.txt", "a")]);
    let remote = Arc::new(MemoryRemote::new());
    let engine = Arc::new(engine(
        test_config(dir.path(), TransferMode::Incremental),
        &remote,
    ));

    let handle = engine.clone().spawn();
    handle.gate.pause();
    while !engine.is_running() {
        tokio::task::yield_now().await;
    }

    let gate = ConcurrencyGate::default();
    let (sink, mut rx) = ghupload_lib::core::events::channel();
    let second = engine.run(&gate, &sink).await;
    assert!(matches!(second, Err(UploadError::AlreadyRunning)));
    assert!(drain(&mut rx).is_empty());

    handle.gate.resume();
    let report = handle.join.await.unwrap().unwrap();
    assert_eq!(report.result.committed, 1);
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_pause_holds_remote_calls() {
    let dir = local_tree(&[("a.txt", "a"), ("b.txt", "b")]);
    let remote = Arc::new(MemoryRemote::new());
    let engine = Arc::new(engine(
        test_config(dir.path(), TransferMode::Incremental),
        &remote,
    ));

    let handle = engine.clone().spawn();
    handle.gate.pause();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(remote.calls().is_empty());
    assert!(handle.gate.is_paused());

    handle.gate.resume();
    let report = handle.join.await.unwrap().unwrap();
    assert_eq!(report.result.committed, 2);
}

#[tokio::test]
async fn test_event_stream_ends_with_single_done() {
    let dir = local_tree(&[("a.txt", "a")]);
    let remote = Arc::new(MemoryRemote::new());

    let (report, events) =
        spawn_and_collect(engine(test_config(dir.path(), TransferMode::Incremental), &remote))
            .await;

    assert_eq!(done_count(&events), 1);
    match events.last() {
        Some(UploadEvent::Done(result)) => assert_eq!(result, &report.result),
        other => panic!("last event was {:?}", other),
    }
    let queue_pos = events
        .iter()
        .position(|e| matches!(e, UploadEvent::QueueInit(_)))
        .unwrap();
    let first_item = events
        .iter()
        .position(|e| matches!(e, UploadEvent::ItemStatus { .. }))
        .unwrap();
    assert!(queue_pos < first_item);
}

#[tokio::test]
async fn test_missing_root_aborts_with_done() {
    let remote = Arc::new(MemoryRemote::new());
    let cfg = test_config(std::path::Path::new("/definitely/not/here"), TransferMode::Incremental);

    let (report, events) = run_once(&engine(cfg, &remote)).await;

    assert!(matches!(report.result.status, RunStatus::Aborted { .. }));
    assert!(remote.calls().is_empty());
    assert_eq!(done_count(&events), 1);
}

#[tokio::test]
async fn test_notifier_receives_single_result() {
    let dir = three_files();
    let remote = Arc::new(MemoryRemote::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(test_config(dir.path(), TransferMode::Incremental), &remote)
        .with_notifier(notifier.clone());

    let (report, events) = run_once(&engine).await;

    let delivered = notifier.results();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], report.result);
    match events.last() {
        Some(UploadEvent::Done(result)) => assert_eq!(result, &delivered[0]),
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_notifier_and_log_keep_classification() {
    let dir = three_files();
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::FetchContent, ErrorKind::Client, 1);
    let notifier = Arc::new(RecordingNotifier::failing());
    let engine = engine(test_config(dir.path(), TransferMode::Incremental), &remote)
        .with_notifier(notifier.clone());

    let (report, events) = run_once(&engine).await;

    assert_eq!(report.result.status, RunStatus::Completed);
    assert_eq!(report.result.committed, 3);
    assert_eq!(report.result.classification(), Classification::Success);
    assert!(remote.file("docs/files.log").is_none());
    assert_eq!(notifier.results().len(), 1);
    assert_eq!(done_count(&events), 1);

    let messages = log_messages(&events);
    assert!(messages.iter().any(|m| m.contains("files.log 错误")));
    assert!(messages.iter().any(|m| m.contains("通知发送失败")));
}

#[tokio::test]
async fn test_file_removed_after_listing_fails_with_read_error() {
    let dir = three_files();
    let remote = Arc::new(MemoryRemote::new());
    let doomed = dir.path().join("b.txt");
    let writes = Arc::new(AtomicUsize::new(0));
    let counter = writes.clone();
    remote.on_success(move |op| {
        if op == RemoteOp::WriteContent && counter.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = std::fs::remove_file(&doomed);
        }
    });

    let (report, _) = run_once(&engine(
        test_config(dir.path(), TransferMode::Incremental),
        &remote,
    ))
    .await;

    assert_eq!(report.result.status, RunStatus::Completed);
    match report.outcome_of("docs/b.txt") {
        Some(TransferOutcome::Failed(detail)) => assert!(detail.starts_with("read-error: ")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(remote.file("docs/b.txt").is_none());
    assert_eq!(remote.file_text("docs/sub/c.txt").as_deref(), Some("charlie"));
    assert_eq!(report.result.committed, 2);
    assert_eq!(report.result.failed, 1);
    assert_eq!(report.result.classification(), Classification::Partial);

    let log = remote.file_text("docs/files.log").unwrap();
    assert!(log.contains("| ❌ | `docs/b.txt` |"));
}
