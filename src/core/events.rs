//! 运行期间对外发布的事件
//!
//! 事件经有序、无界的 mpsc 通道送给展示层；这是运行中核心对外通信的唯一渠道。

use crate::models::{SessionResult, StatsSnapshot, TransferOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 队列中单个文件的显示状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    InProgress,
    /// 单提交模式：blob 已创建，等待提交
    Staged,
    Committed,
    Skipped,
    Failed,
    DryRun,
}

impl ItemStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            ItemStatus::InProgress => "⏳",
            ItemStatus::Staged => "📎",
            ItemStatus::Committed => "✅",
            ItemStatus::Skipped => "⏭️",
            ItemStatus::Failed => "❌",
            ItemStatus::DryRun => "🧪",
        }
    }
}

impl From<&TransferOutcome> for ItemStatus {
    fn from(outcome: &TransferOutcome) -> Self {
        match outcome {
            TransferOutcome::Committed(_) => ItemStatus::Committed,
            TransferOutcome::Skipped(_) => ItemStatus::Skipped,
            TransferOutcome::Failed(_) => ItemStatus::Failed,
            TransferOutcome::DryRun => ItemStatus::DryRun,
        }
    }
}

/// 运行开始时的队列条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub repo_path: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum UploadEvent {
    Log { level: LogLevel, message: String },
    /// 状态栏文本
    Status(String),
    QueueInit(Vec<QueueEntry>),
    ItemStatus { index: usize, status: ItemStatus },
    Progress { done: usize, total: usize },
    Stats(StatsSnapshot),
    /// 每次运行恰好一次，且总是最后一个事件
    Done(SessionResult),
}

/// 事件发送端
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<UploadEvent>,
}

pub fn channel() -> (EventSink, UnboundedReceiver<UploadEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    /// 接收端已关闭时静默丢弃
    pub fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// 发布日志事件，并同步写入 tracing
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(UploadEvent::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(UploadEvent::Status(text.into()));
    }

    pub fn item(&self, index: usize, status: ItemStatus) {
        self.emit(UploadEvent::ItemStatus { index, status });
    }

    pub fn progress(&self, done: usize, total: usize) {
        self.emit(UploadEvent::Progress { done, total });
    }

    pub fn stats(&self, snapshot: StatsSnapshot) {
        self.emit(UploadEvent::Stats(snapshot));
    }

    pub fn done(&self, result: SessionResult) {
        self.emit(UploadEvent::Done(result));
    }
}
