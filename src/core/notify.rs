use crate::core::session_log::{format_elapsed, human_size};
use crate::models::{Classification, SessionResult};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// 上传成功后的本地处理（回收或删除），由外部实现
#[async_trait]
pub trait Disposer: Send + Sync {
    async fn dispose(&self, local_path: &Path) -> Result<()>;
}

/// 运行结束时接收最终结果
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, result: &SessionResult) -> Result<()>;
}

/// 成功/失败两类通知的开关
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyFilter {
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for NotifyFilter {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
        }
    }
}

impl NotifyFilter {
    /// 部分成功同时属于失败类
    pub fn should_send(&self, classification: Classification) -> bool {
        match classification {
            Classification::Success => self.on_success,
            Classification::Partial | Classification::Failure => self.on_failure,
            Classification::Nothing => false,
        }
    }
}

/// 把完成事件写成一行 tracing 日志
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    pub filter: NotifyFilter,
}

impl LogNotifier {
    pub fn new(filter: NotifyFilter) -> Self {
        Self { filter }
    }

    pub fn render(result: &SessionResult) -> String {
        format!(
            "{}上传结束 [{:?}] — ✅{} ❌{} ⏭️{} 🗑️{} • {} • {}",
            if result.dry_run { "🧪 " } else { "" },
            result.classification(),
            result.committed,
            result.failed,
            result.skipped,
            result.deleted,
            human_size(result.bytes_transferred),
            format_elapsed(result.elapsed())
        )
    }
}

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, result: &SessionResult) -> Result<()> {
        if self.filter.should_send(result.classification()) {
            info!("{}", Self::render(result));
        } else {
            info!("通知已跳过（过滤设置）");
        }
        Ok(())
    }
}
