#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use ghupload_lib::core::events::{self, EventSink};
use ghupload_lib::{
    CompletionNotifier, ConcurrencyGate, MemoryRemote, SessionResult, TransferMode, UploadConfig,
    UploadEngine, UploadEvent, UploadReport,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// 按 (相对路径, 内容) 生成本地目录
pub fn local_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = setup_temp_dir();
    for (rel, content) in files {
        write_file(dir.path(), rel, content.as_bytes());
    }
    dir
}

pub fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("file has a parent")).expect("create parent dirs");
    fs::write(path, content).expect("write test file");
}

/// 创建一个稀疏的大文件（不实际占用磁盘）
pub fn sparse_file(root: &Path, rel: &str, len: u64) {
    let path = root.join(rel);
    let file = fs::File::create(path).expect("create sparse file");
    file.set_len(len).expect("extend sparse file");
}

/// 零等待的测试配置
pub fn test_config(root: &Path, mode: TransferMode) -> UploadConfig {
    let mut cfg = UploadConfig::new("me", "files", root);
    cfg.target_prefix = "docs".into();
    cfg.delay_secs = 0.0;
    cfg.pause_poll_ms = 5;
    cfg.mode = mode;
    cfg
}

pub fn engine(config: UploadConfig, remote: &Arc<MemoryRemote>) -> UploadEngine {
    UploadEngine::new(config, remote.clone())
}

pub fn drain(rx: &mut UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// 在当前任务中执行一次运行，返回报告和全部事件
pub async fn run_once(engine: &UploadEngine) -> (UploadReport, Vec<UploadEvent>) {
    let gate = ConcurrencyGate::new(engine.config().pause_poll());
    run_with_gate(engine, &gate).await
}

pub async fn run_with_gate(
    engine: &UploadEngine,
    gate: &ConcurrencyGate,
) -> (UploadReport, Vec<UploadEvent>) {
    let (sink, mut rx): (EventSink, _) = events::channel();
    let report = engine.run(gate, &sink).await.expect("engine was idle");
    (report, drain(&mut rx))
}

/// 通过 `spawn` 运行并收集事件流直到结束
pub async fn spawn_and_collect(engine: UploadEngine) -> (UploadReport, Vec<UploadEvent>) {
    let mut handle = Arc::new(engine).spawn();
    let mut seen = Vec::new();
    while let Some(event) = handle.events.next().await {
        seen.push(event);
    }
    let report = handle
        .join
        .await
        .expect("worker task panicked")
        .expect("engine was idle");
    (report, seen)
}

pub fn done_count(events: &[UploadEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, UploadEvent::Done(_)))
        .count()
}

pub fn log_messages(events: &[UploadEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Log { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// 记录收到的每个结果；`failing` 时在记录后返回错误
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    results: Mutex<Vec<SessionResult>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn results(&self) -> Vec<SessionResult> {
        self.results.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, result: &SessionResult) -> anyhow::Result<()> {
        self.results.lock().expect("notifier lock").push(result.clone());
        if self.fail {
            anyhow::bail!("notification endpoint unreachable");
        }
        Ok(())
    }
}
