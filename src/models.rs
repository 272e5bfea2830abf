//! 上传过程中的数据模型

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// 单个待上传文件（由扫描器创建，之后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local_path: PathBuf,
    /// 仓库内路径（posix 风格，已拼接前缀），作为唯一标识
    pub repo_path: String,
    pub size_bytes: u64,
}

impl UploadItem {
    /// 本地文件名（用于提交信息和日志）
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.repo_path.clone())
    }
}

/// 单个文件的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum TransferOutcome {
    Committed(u64),
    Skipped(String),
    Failed(String),
    DryRun,
}

impl TransferOutcome {
    /// 会话日志中使用的状态图标
    pub fn icon(&self) -> &'static str {
        match self {
            TransferOutcome::Committed(_) => "✅",
            TransferOutcome::Skipped(_) => "⏭️",
            TransferOutcome::Failed(_) => "❌",
            TransferOutcome::DryRun => "🧪",
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TransferOutcome::Committed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransferOutcome::Failed(_))
    }
}

/// 一个文件及其结果
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item: UploadItem,
    pub outcome: TransferOutcome,
}

/// 运行中的统计（仅由工作任务持有和修改）
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub committed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub deleted: u32,
    pub bytes_transferred: u64,
    pub start_time: Instant,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            committed: 0,
            failed: 0,
            skipped: 0,
            deleted: 0,
            bytes_transferred: 0,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 按结果累加计数
    pub fn record(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Committed(size) => {
                self.committed += 1;
                self.bytes_transferred += size;
            }
            TransferOutcome::DryRun => self.committed += 1,
            TransferOutcome::Skipped(_) => self.skipped += 1,
            TransferOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// 撤销一次 [`record`](Self::record)（单提交模式中止时修正暂存计数）
    pub fn retract(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Committed(size) => {
                self.committed = self.committed.saturating_sub(1);
                self.bytes_transferred = self.bytes_transferred.saturating_sub(*size);
            }
            TransferOutcome::DryRun => self.committed = self.committed.saturating_sub(1),
            TransferOutcome::Skipped(_) => self.skipped = self.skipped.saturating_sub(1),
            TransferOutcome::Failed(_) => self.failed = self.failed.saturating_sub(1),
        }
    }

    /// 生成只读快照（用于事件通道）
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.elapsed();
        let minutes = elapsed.as_secs_f64().max(0.01) / 60.0;
        StatsSnapshot {
            committed: self.committed,
            failed: self.failed,
            skipped: self.skipped,
            deleted: self.deleted,
            bytes_transferred: self.bytes_transferred,
            elapsed_ms: elapsed.as_millis() as u64,
            files_per_minute: self.committed as f64 / minutes,
            bytes_per_second: (self.bytes_transferred as f64 / elapsed.as_secs_f64().max(0.01)) as u64,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub committed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub deleted: u32,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub files_per_minute: f64,
    pub bytes_per_second: u64,
}

/// 树条目：仓库路径 -> blob hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub blob: String,
}

/// 单提交模式下逐步构建的批次
#[derive(Debug, Clone)]
pub struct AtomicBatch {
    pub base_commit: String,
    pub base_tree: String,
    entries: Vec<TreeEntry>,
}

impl AtomicBatch {
    pub fn new(base_commit: String, base_tree: String) -> Self {
        Self {
            base_commit,
            base_tree,
            entries: Vec::new(),
        }
    }

    /// 插入或替换同一路径的条目
    pub fn upsert(&mut self, path: &str, blob: String) {
        self.entries.retain(|e| e.path != path);
        self.entries.push(TreeEntry {
            path: path.to_string(),
            blob,
        });
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 运行的终止方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Aborted { reason: String },
}

/// 通知分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Success,
    Partial,
    Failure,
    /// 试运行或空运行，两类过滤器都不适用
    Nothing,
}

/// 运行结束后的不可变汇总（唯一交给通知方的数据）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub committed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub deleted: u32,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub dry_run: bool,
    pub status: RunStatus,
}

impl SessionResult {
    pub fn from_stats(stats: &SessionStats, dry_run: bool, status: RunStatus) -> Self {
        Self {
            committed: stats.committed,
            failed: stats.failed,
            skipped: stats.skipped,
            deleted: stats.deleted,
            bytes_transferred: stats.bytes_transferred,
            elapsed_ms: stats.elapsed().as_millis() as u64,
            dry_run,
            status,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn classification(&self) -> Classification {
        if self.failed == 0 && self.committed > 0 {
            Classification::Success
        } else if self.failed > 0 && self.committed > 0 {
            Classification::Partial
        } else if self.failed > 0 || !self.dry_run {
            Classification::Failure
        } else {
            Classification::Nothing
        }
    }
}

/// 一次运行的完整报告
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub result: SessionResult,
    /// 按扫描顺序排列；未到达的文件不出现
    pub outcomes: Vec<ItemOutcome>,
}

impl UploadReport {
    pub fn outcome_of(&self, repo_path: &str) -> Option<&TransferOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.item.repo_path == repo_path)
            .map(|o| &o.outcome)
    }

    pub fn committed_paths(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_committed())
            .map(|o| o.item.repo_path.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(committed: u32, failed: u32, dry_run: bool) -> SessionResult {
        SessionResult {
            committed,
            failed,
            skipped: 0,
            deleted: 0,
            bytes_transferred: 0,
            elapsed_ms: 0,
            dry_run,
            status: RunStatus::Completed,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(result(3, 0, false).classification(), Classification::Success);
        assert_eq!(result(3, 1, false).classification(), Classification::Partial);
        assert_eq!(result(0, 2, false).classification(), Classification::Failure);
        assert_eq!(result(0, 0, false).classification(), Classification::Failure);
        assert_eq!(result(0, 0, true).classification(), Classification::Nothing);
        assert_eq!(result(5, 0, true).classification(), Classification::Success);
    }

    #[test]
    fn test_batch_upsert_replaces_same_path() {
        let mut batch = AtomicBatch::new("c0".into(), "t0".into());
        batch.upsert("docs/files.log", "b1".into());
        batch.upsert("docs/a.txt", "b2".into());
        batch.upsert("docs/files.log", "b3".into());

        let logs: Vec<_> = batch
            .entries()
            .iter()
            .filter(|e| e.path == "docs/files.log")
            .collect();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].blob, "b3");
        assert_eq!(batch.entries().len(), 2);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = SessionStats::new();
        stats.record(&TransferOutcome::Committed(10));
        stats.record(&TransferOutcome::DryRun);
        stats.record(&TransferOutcome::Skipped("too-large".into()));
        stats.record(&TransferOutcome::Failed("read-error".into()));
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.bytes_transferred, 10);

        stats.retract(&TransferOutcome::Committed(10));
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.bytes_transferred, 0);
    }
}
