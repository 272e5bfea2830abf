//! 单提交模式：先读取全部文件，再用 blob/tree/commit/ref 四步生成一次提交
//!
//! tree、commit、ref 任一步失败都会中止整批；单个 blob 失败只影响该文件。

use crate::core::engine::{back_off, staged_row, RunContext, UploadEngine};
use crate::core::events::ItemStatus;
use crate::core::gate::Cancelled;
use crate::core::retry::{RetryDecision, RetryState, MAX_CREATE_ATTEMPTS};
use crate::core::scanner::MAX_FILE_SIZE;
use crate::core::session_log::{self, eta, human_size, LogRow};
use crate::models::{AtomicBatch, RunStatus, TransferOutcome};
use crate::remote::RemoteError;
use std::future::Future;
use tracing::{debug, info, warn};

/// 重试步骤的结果
enum StepError {
    Cancelled,
    Failed(String),
}

impl From<Cancelled> for StepError {
    fn from(_: Cancelled) -> Self {
        StepError::Cancelled
    }
}

/// 已读取、等待创建 blob 的文件
struct ReadFile {
    index: usize,
    content: Vec<u8>,
}

/// 已创建 blob、等待提交的文件
struct Staged {
    index: usize,
    size: u64,
}

/// 带有限次重试地执行一次远程创建
///
/// `interruptible` 为 false 时等待不响应取消（tree/commit/ref 序列开始后不可中断）。
async fn with_retry<T, F, Fut>(
    ctx: &RunContext<'_>,
    what: &str,
    interruptible: bool,
    mut op: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let delay = ctx.config.delay();
    let mut retry = RetryState::new(delay, MAX_CREATE_ATTEMPTS);
    let mut last_error = String::new();

    while retry.begin_attempt() {
        if interruptible {
            ctx.gate.sleep(delay).await?;
        } else {
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                if interruptible {
                    if let Some(detail) = back_off(ctx, &mut retry, &e, what).await? {
                        return Err(StepError::Failed(detail));
                    }
                } else {
                    match retry.on_error(&e) {
                        RetryDecision::Retry { delay, kind } => {
                            warn!(
                                "{}失败 ({:?}, 第 {} 次)，{:?} 后重试: {}",
                                what, kind, retry.attempt, delay, e
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp { detail } => {
                            return Err(StepError::Failed(detail));
                        }
                    }
                }
            }
        }
    }

    Err(StepError::Failed(format!("gave-up: {}", last_error)))
}

impl UploadEngine {
    pub(crate) async fn run_atomic(&self, ctx: &mut RunContext<'_>) -> RunStatus {
        let total = ctx.total();

        // ===== 读取阶段：不发生任何远程调用 =====
        let mut read_files: Vec<ReadFile> = Vec::new();
        for index in 0..total {
            if ctx.gate.checkpoint().await.is_err() {
                ctx.events.warn("⏹️  已取消");
                return RunStatus::Cancelled;
            }

            let item = ctx.items[index].clone();
            ctx.events.item(index, ItemStatus::InProgress);

            if item.size_bytes >= MAX_FILE_SIZE {
                ctx.events
                    .info(format!("⏭️  已跳过 (too-large): {}", item.file_name()));
                ctx.record(index, TransferOutcome::Skipped("too-large".into()));
                continue;
            }

            match tokio::fs::read(&item.local_path).await {
                Ok(content) => {
                    ctx.events
                        .status(format!("读取 {}/{}: {}", index + 1, total, item.file_name()));
                    ctx.events.progress(index + 1, total);
                    read_files.push(ReadFile { index, content });
                }
                Err(e) => {
                    ctx.events
                        .error(format!("❌ {}: {}", item.file_name(), e));
                    ctx.record(index, TransferOutcome::Failed(format!("read-error: {}", e)));
                }
            }
        }

        if ctx.config.dry_run {
            for file in &read_files {
                let item = &ctx.items[file.index];
                ctx.events.info(format!(
                    "🧪 将包含 → {}  ({})",
                    item.repo_path,
                    human_size(item.size_bytes)
                ));
            }
            for file in read_files {
                ctx.record(file.index, TransferOutcome::DryRun);
            }
            return RunStatus::Completed;
        }

        if read_files.is_empty() {
            ctx.events.warn("⚠️  没有可提交的文件");
            return RunStatus::Aborted {
                reason: "nothing to commit".into(),
            };
        }

        // ===== 提交阶段 =====
        let remote = ctx.remote;
        ctx.events.status("正在获取分支…");
        let base_commit = match with_retry(ctx, "获取分支", true, || remote.branch_head()).await {
            Ok(sha) => sha,
            Err(e) => return self.lookup_failed(ctx, e, "分支不存在或无法读取"),
        };
        let base_tree = match with_retry(ctx, "获取 tree", true, || remote.commit_tree(&base_commit)).await
        {
            Ok(sha) => sha,
            Err(e) => return self.lookup_failed(ctx, e, "无法读取基础 tree"),
        };
        ctx.events.info(format!(
            "✅ 基础提交:{}  tree:{}",
            short(&base_commit),
            short(&base_tree)
        ));

        let mut batch = AtomicBatch::new(base_commit, base_tree);
        let mut staged: Vec<Staged> = Vec::new();
        let upload_total = read_files.len();

        for (n, file) in read_files.iter().enumerate() {
            if ctx.gate.checkpoint().await.is_err() {
                self.abandon(ctx, &staged, None);
                ctx.events.warn("⏹️  已取消");
                return RunStatus::Cancelled;
            }

            let item = ctx.items[file.index].clone();
            ctx.events.status(format!(
                "Blob {}/{}: {}  •  {}",
                n + 1,
                upload_total,
                item.file_name(),
                eta(n, upload_total, ctx.stats.elapsed())
            ));

            let content = file.content.as_slice();
            match with_retry(ctx, "创建 blob", true, || remote.create_blob(content)).await {
                Ok(blob) => {
                    batch.upsert(&item.repo_path, blob);
                    let size = content.len() as u64;
                    // 暂存即计入统计，中止时再撤销
                    ctx.stats.record(&TransferOutcome::Committed(size));
                    staged.push(Staged {
                        index: file.index,
                        size,
                    });
                    ctx.events.item(file.index, ItemStatus::Staged);
                    ctx.events.info(format!(
                        "  📎 [{}/{}] {}  •  {}",
                        n + 1,
                        upload_total,
                        item.repo_path,
                        eta(n + 1, upload_total, ctx.stats.elapsed())
                    ));
                    ctx.events.progress(n + 1, upload_total);
                    ctx.publish_stats();
                }
                Err(StepError::Cancelled) => {
                    self.abandon(ctx, &staged, None);
                    ctx.events.warn("⏹️  已取消");
                    return RunStatus::Cancelled;
                }
                Err(StepError::Failed(detail)) => {
                    ctx.events
                        .error(format!("❌ blob 创建失败: {}: {}", item.file_name(), detail));
                    ctx.record(file.index, TransferOutcome::Failed(detail));
                }
            }
        }
        drop(read_files);

        if ctx.config.write_session_log {
            match self.stage_session_log(ctx, &staged).await {
                Ok(Some((path, blob))) => {
                    batch.upsert(&path, blob);
                    ctx.events.info(format!("✅ files.log blob → {}", path));
                }
                Ok(None) => {}
                Err(Cancelled) => {
                    self.abandon(ctx, &staged, None);
                    ctx.events.warn("⏹️  已取消");
                    return RunStatus::Cancelled;
                }
            }
        }

        if batch.is_empty() {
            ctx.events.error("❌ 没有 tree 条目");
            return RunStatus::Aborted {
                reason: "no tree entries".into(),
            };
        }

        // ===== tree → commit → ref，开始后不再响应取消 =====
        ctx.events.status("正在创建 tree…");
        let tree = match with_retry(ctx, "创建 tree", false, || {
            remote.create_tree(&batch.base_tree, batch.entries())
        })
        .await
        {
            Ok(sha) => sha,
            Err(e) => return self.abort_batch(ctx, &staged, "tree 创建失败", e),
        };
        ctx.events.info(format!("✅ Tree:{}", short(&tree)));

        let message = ctx.config.render_batch_message(total);
        ctx.events.status("正在创建提交…");
        ctx.events.info(format!("💾 \"{}\"", message));
        let commit = match with_retry(ctx, "创建提交", false, || {
            remote.create_commit(&message, &tree, &batch.base_commit)
        })
        .await
        {
            Ok(sha) => sha,
            Err(e) => return self.abort_batch(ctx, &staged, "提交创建失败", e),
        };
        ctx.events.info(format!("✅ Commit:{}", short(&commit)));

        ctx.events.status("正在更新分支…");
        if let Err(e) = with_retry(ctx, "更新分支", false, || remote.move_ref(&commit)).await {
            return self.abort_batch(ctx, &staged, "分支更新失败", e);
        }
        ctx.events
            .info(format!("✅ 分支 '{}' 已更新", ctx.config.branch));
        info!("单次提交完成: {} 个文件, commit {}", staged.len(), commit);

        for file in &staged {
            ctx.settle(file.index, TransferOutcome::Committed(file.size));
        }

        // 只有 ref 移动成功后才处理本地文件
        for index in 0..total {
            if matches!(ctx.outcome(index), Some(TransferOutcome::Committed(_))) {
                ctx.dispose(index).await;
            }
        }
        ctx.publish_stats();

        RunStatus::Completed
    }

    /// 读取旧日志并创建新日志 blob；读取失败（非不存在）时跳过日志
    async fn stage_session_log(
        &self,
        ctx: &RunContext<'_>,
        staged: &[Staged],
    ) -> Result<Option<(String, String)>, Cancelled> {
        let config = ctx.config;
        let path = config.log_path();
        ctx.events.info("📋 正在生成 files.log blob…");

        let existing = match ctx.remote.fetch_content(&path).await {
            Ok(existing) => existing,
            Err(e) => {
                ctx.events
                    .warn(format!("⚠️  无法读取 files.log，本次不写入: {}", e));
                return Ok(None);
            }
        };

        let rows: Vec<LogRow> = (0..ctx.total())
            .filter_map(|index| {
                let item = &ctx.items[index];
                match ctx.outcome(index) {
                    Some(outcome) => Some(LogRow::new(item, outcome.icon())),
                    None if staged.iter().any(|s| s.index == index) => Some(staged_row(item)),
                    None => None,
                }
            })
            .collect();

        let mut counts = ctx.counts();
        counts.deleted = 0;
        let block = session_log::session_block(
            &rows,
            counts,
            ctx.stats.elapsed(),
            false,
            chrono::Utc::now(),
        );
        let header = session_log::log_header(&config.owner, &config.repo, &config.branch);
        let full = session_log::compose(existing.as_ref().map(|c| c.text.as_str()), &header, &block);

        let remote = ctx.remote;
        let bytes = full.as_bytes();
        match with_retry(ctx, "创建 files.log blob", true, || remote.create_blob(bytes)).await {
            Ok(blob) => Ok(Some((path, blob))),
            Err(StepError::Cancelled) => Err(Cancelled),
            Err(StepError::Failed(detail)) => {
                ctx.events
                    .warn(format!("⚠️  files.log blob 创建失败（不影响结果）: {}", detail));
                Ok(None)
            }
        }
    }

    fn lookup_failed(&self, ctx: &mut RunContext<'_>, err: StepError, what: &str) -> RunStatus {
        match err {
            StepError::Cancelled => {
                ctx.events.warn("⏹️  已取消");
                RunStatus::Cancelled
            }
            StepError::Failed(detail) => {
                ctx.events.error(format!("❌ {}: {}", what, detail));
                RunStatus::Aborted {
                    reason: format!("{}: {}", what, detail),
                }
            }
        }
    }

    /// tree/commit/ref 失败：已暂存的文件全部记为失败
    fn abort_batch(
        &self,
        ctx: &mut RunContext<'_>,
        staged: &[Staged],
        what: &str,
        err: StepError,
    ) -> RunStatus {
        let detail = match err {
            StepError::Failed(detail) => detail,
            StepError::Cancelled => "cancelled".into(),
        };
        let reason = format!("{}: {}", what, detail);
        ctx.events.error(format!("❌ {}", reason));
        self.abandon(ctx, staged, Some(&reason));
        RunStatus::Aborted { reason }
    }

    /// 撤销暂存计数；给出原因时记为失败，否则不产生结果
    fn abandon(&self, ctx: &mut RunContext<'_>, staged: &[Staged], reason: Option<&str>) {
        for file in staged {
            ctx.stats.retract(&TransferOutcome::Committed(file.size));
            if let Some(reason) = reason {
                ctx.record(
                    file.index,
                    TransferOutcome::Failed(format!("batch aborted: {}", reason)),
                );
            }
        }
        if !staged.is_empty() {
            debug!("撤销 {} 个暂存文件", staged.len());
            ctx.publish_stats();
        }
    }
}

fn short(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
