use crate::config::{DisposalMode, TransferMode, UploadConfig};
use crate::core::events::{self, EventSink, ItemStatus, QueueEntry, UploadEvent};
use crate::core::gate::{Cancelled, ConcurrencyGate, GateHandle};
use crate::core::notify::{CompletionNotifier, Disposer};
use crate::core::retry::{RetryDecision, RetryState, MAX_FILE_ATTEMPTS};
use crate::core::scanner::{FileSetCollector, ScanError, MAX_FILE_SIZE};
use crate::core::session_log::{
    self, eta, format_elapsed, human_size, BlockCounts, LogRow, LOG_COMMIT_MESSAGE,
};
use crate::models::{
    ItemOutcome, RunStatus, SessionResult, SessionStats, TransferOutcome, UploadItem, UploadReport,
};
use crate::remote::{RemoteError, RemoteObjectClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("已有上传任务正在运行")]
    AlreadyRunning,
}

/// 后台运行的句柄
pub struct UploadHandle {
    pub gate: GateHandle,
    pub events: UnboundedReceiverStream<UploadEvent>,
    pub join: JoinHandle<Result<UploadReport, UploadError>>,
}

/// 一次运行内的可变状态，只由工作任务持有
pub(crate) struct RunContext<'a> {
    pub(crate) config: &'a UploadConfig,
    pub(crate) remote: &'a dyn RemoteObjectClient,
    pub(crate) gate: &'a ConcurrencyGate,
    pub(crate) events: &'a EventSink,
    disposer: Option<&'a dyn Disposer>,
    pub(crate) items: Vec<UploadItem>,
    outcomes: Vec<Option<TransferOutcome>>,
    pub(crate) stats: SessionStats,
}

impl<'a> RunContext<'a> {
    pub(crate) fn total(&self) -> usize {
        self.items.len()
    }

    /// 记录终态并累加统计；每个文件只记录一次
    pub(crate) fn record(&mut self, index: usize, outcome: TransferOutcome) {
        self.stats.record(&outcome);
        self.settle(index, outcome);
    }

    /// 只写入终态，不动统计（统计已在暂存时计入）
    pub(crate) fn settle(&mut self, index: usize, outcome: TransferOutcome) {
        let Some(slot) = self.outcomes.get_mut(index) else {
            return;
        };
        if slot.is_some() {
            warn!("重复记录结果: {}", self.items[index].repo_path);
            return;
        }
        self.events.item(index, ItemStatus::from(&outcome));
        *slot = Some(outcome);
    }

    pub(crate) fn outcome(&self, index: usize) -> Option<&TransferOutcome> {
        self.outcomes.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn publish_stats(&self) {
        self.events.stats(self.stats.snapshot());
    }

    pub(crate) fn counts(&self) -> BlockCounts {
        BlockCounts {
            committed: self.stats.committed,
            failed: self.stats.failed,
            skipped: self.stats.skipped,
            deleted: self.stats.deleted,
        }
    }

    /// 按扫描顺序列出已产生的结果
    pub(crate) fn ledger(&self) -> Vec<ItemOutcome> {
        self.items
            .iter()
            .zip(&self.outcomes)
            .filter_map(|(item, outcome)| {
                outcome.as_ref().map(|o| ItemOutcome {
                    item: item.clone(),
                    outcome: o.clone(),
                })
            })
            .collect()
    }

    /// 调用外部的本地处理；失败只记录日志
    pub(crate) async fn dispose(&mut self, index: usize) {
        if self.config.disposal == DisposalMode::None {
            return;
        }
        let Some(disposer) = self.disposer else {
            return;
        };
        let path = self.items[index].local_path.clone();
        match disposer.dispose(&path).await {
            Ok(()) => {
                self.stats.deleted += 1;
                let verb = match self.config.disposal {
                    DisposalMode::Recycle => "已回收",
                    _ => "已删除",
                };
                self.events.info(format!("🗑️  {}: {}", verb, path.display()));
            }
            Err(e) => {
                self.events
                    .warn(format!("⚠️  本地处理失败: {}: {}", path.display(), e));
            }
        }
    }
}

/// 上传引擎
pub struct UploadEngine {
    config: Arc<UploadConfig>,
    remote: Arc<dyn RemoteObjectClient>,
    disposer: Option<Arc<dyn Disposer>>,
    notifier: Option<Arc<dyn CompletionNotifier>>,
    running: Arc<AtomicBool>,
}

impl UploadEngine {
    pub fn new(config: UploadConfig, remote: Arc<dyn RemoteObjectClient>) -> Self {
        Self {
            config: Arc::new(config),
            remote,
            disposer: None,
            notifier: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_disposer(mut self, disposer: Arc<dyn Disposer>) -> Self {
        self.disposer = Some(disposer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 在后台任务中运行
    pub fn spawn(self: Arc<Self>) -> UploadHandle {
        let gate = ConcurrencyGate::new(self.config.pause_poll());
        let handle = gate.handle();
        let (sink, rx) = events::channel();

        let join = tokio::spawn(async move { self.run(&gate, &sink).await });

        UploadHandle {
            gate: handle,
            events: UnboundedReceiverStream::new(rx),
            join,
        }
    }

    /// 执行一次完整运行；结束时总会发出 `Done` 事件
    pub async fn run(
        &self,
        gate: &ConcurrencyGate,
        events: &EventSink,
    ) -> Result<UploadReport, UploadError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("拒绝启动: 已有上传任务正在运行");
            return Err(UploadError::AlreadyRunning);
        }
        let _running = scopeguard::guard(self.running.clone(), |flag| {
            flag.store(false, Ordering::SeqCst)
        });

        let span = info_span!("upload", run_id = %Uuid::new_v4(), mode = ?self.config.mode);
        Ok(self.execute(gate, events).instrument(span).await)
    }

    async fn execute(&self, gate: &ConcurrencyGate, events: &EventSink) -> UploadReport {
        let config = self.config.as_ref();
        info!(
            "开始上传任务: {}/{} ({}) <- {}",
            config.owner,
            config.repo,
            config.branch,
            config.local_root.display()
        );

        let mut ctx = RunContext {
            config,
            remote: self.remote.as_ref(),
            gate,
            events,
            disposer: self.disposer.as_deref(),
            items: Vec::new(),
            outcomes: Vec::new(),
            stats: SessionStats::new(),
        };

        let status = match self.collect(gate).await {
            Ok(items) => {
                ctx.outcomes = vec![None; items.len()];
                ctx.items = items;
                self.process(&mut ctx).await
            }
            Err(ScanError::Cancelled) => {
                events.warn("⏹️  已取消");
                RunStatus::Cancelled
            }
            Err(e) => {
                events.error(format!("❌ 扫描失败: {}", e));
                RunStatus::Aborted {
                    reason: e.to_string(),
                }
            }
        };

        self.finish(ctx, status).await
    }

    async fn collect(&self, gate: &ConcurrencyGate) -> Result<Vec<UploadItem>, ScanError> {
        let collector = FileSetCollector::from_config(&self.config)?.with_cancel(gate.token());
        let root = self.config.local_root.clone();
        tokio::task::spawn_blocking(move || collector.collect(&root))
            .await
            .unwrap_or_else(|e| Err(ScanError::Worker(e.to_string())))
    }

    async fn process(&self, ctx: &mut RunContext<'_>) -> RunStatus {
        let config = ctx.config;
        let total = ctx.total();
        if total == 0 {
            ctx.events.warn("⚠️  没有找到文件");
            return RunStatus::Completed;
        }

        ctx.events.emit(UploadEvent::QueueInit(
            ctx.items
                .iter()
                .map(|item| QueueEntry {
                    repo_path: item.repo_path.clone(),
                    size: human_size(item.size_bytes),
                })
                .collect(),
        ));

        match config.mode {
            TransferMode::Incremental => ctx.events.info(format!("📂 找到 {} 个文件", total)),
            TransferMode::Atomic => ctx.events.info(format!("📂 {} 个文件 → 单次提交", total)),
        }
        if config.dry_run {
            ctx.events.info("🧪 试运行: 不调用 API");
        }
        let prefix = match config.prefix() {
            "" => "(root)",
            p => p,
        };
        ctx.events.info(format!(
            "📦 {}/{}  分支:{}  目标:/{}",
            config.owner, config.repo, config.branch, prefix
        ));
        debug!(
            "commit 模板: {:?}, delay: {}s, 本地处理: {:?}",
            config.commit_message, config.delay_secs, config.disposal
        );

        match config.mode {
            TransferMode::Incremental => self.run_incremental(ctx).await,
            TransferMode::Atomic => self.run_atomic(ctx).await,
        }
    }

    /// 逐文件模式：每个文件一次写入、一次提交
    async fn run_incremental(&self, ctx: &mut RunContext<'_>) -> RunStatus {
        let total = ctx.total();
        let mut cancelled = false;

        for index in 0..total {
            if ctx.gate.checkpoint().await.is_err() {
                cancelled = true;
                break;
            }

            let item = ctx.items[index].clone();
            ctx.events.status(format!(
                "[{}/{}] {}  •  {}  •  已发送 {}",
                index + 1,
                total,
                item.file_name(),
                eta(index, total, ctx.stats.elapsed()),
                human_size(ctx.stats.bytes_transferred)
            ));
            ctx.events.item(index, ItemStatus::InProgress);

            let outcome = match transfer_file(ctx, index, &item).await {
                Ok(outcome) => outcome,
                Err(Cancelled) => {
                    // 进行中的文件不记录结果
                    cancelled = true;
                    break;
                }
            };

            let committed = outcome.is_committed();
            self.log_outcome(ctx, index, &item, &outcome);
            ctx.record(index, outcome);
            if committed {
                ctx.dispose(index).await;
            }

            ctx.events.progress(index + 1, total);
            ctx.publish_stats();
        }

        if cancelled {
            ctx.events.warn("⏹️  已取消");
            return RunStatus::Cancelled;
        }

        let config = ctx.config;
        if config.write_session_log && !config.dry_run {
            let rows = session_log::rows_for(&ctx.ledger());
            if !rows.is_empty() {
                let block = session_log::session_block(
                    &rows,
                    ctx.counts(),
                    ctx.stats.elapsed(),
                    false,
                    chrono::Utc::now(),
                );
                push_session_log(ctx, &block).await;
            }
        }

        RunStatus::Completed
    }

    fn log_outcome(
        &self,
        ctx: &RunContext<'_>,
        index: usize,
        item: &UploadItem,
        outcome: &TransferOutcome,
    ) {
        let total = ctx.total();
        let size = human_size(item.size_bytes);
        match outcome {
            TransferOutcome::Committed(_) => {
                let stats = ctx.stats.snapshot();
                ctx.events.info(format!(
                    "✅ [{}/{}] {}  ({})  •  {}  •  {:.1} f/min",
                    index + 1,
                    total,
                    item.repo_path,
                    size,
                    eta(index + 1, total, ctx.stats.elapsed()),
                    stats.files_per_minute
                ));
            }
            TransferOutcome::DryRun => ctx.events.info(format!(
                "🧪 [{}/{}] 将上传 → {}  ({})",
                index + 1,
                total,
                item.repo_path,
                size
            )),
            TransferOutcome::Skipped(reason) => ctx.events.info(format!(
                "⏭️  已跳过 ({}): {}",
                reason,
                item.file_name()
            )),
            TransferOutcome::Failed(reason) => ctx.events.error(format!(
                "❌ [{}/{}] {} → {}",
                index + 1,
                total,
                item.repo_path,
                reason
            )),
        }
    }

    async fn finish(&self, ctx: RunContext<'_>, status: RunStatus) -> UploadReport {
        let result = SessionResult::from_stats(&ctx.stats, self.config.dry_run, status);
        let events = ctx.events;
        let elapsed = format_elapsed(result.elapsed());

        if let RunStatus::Aborted { reason } = &result.status {
            error!("上传任务中止: {}", reason);
        }

        let pre = if result.dry_run { "🧪 " } else { "" };
        events.info(format!("{}✅ 已提交 : {}", pre, result.committed));
        events.info(format!("❌ 失败   : {}", result.failed));
        events.info(format!("⏭️  跳过   : {}", result.skipped));
        events.info(format!("🗑️  本地处理: {}", result.deleted));
        events.info(format!("⏱️  耗时   : {}", elapsed));
        events.status(format!(
            "{}完成 — ✅{} ❌{} ⏭️{} 🗑️{} ({})",
            pre, result.committed, result.failed, result.skipped, result.deleted, elapsed
        ));

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&result).await {
                events.warn(format!("⚠️  通知发送失败（不影响结果）: {}", e));
            }
        }

        info!(
            "上传任务结束: {:?}, 提交 {}, 失败 {}, 跳过 {}",
            result.status, result.committed, result.failed, result.skipped
        );

        let report = UploadReport {
            result: result.clone(),
            outcomes: ctx.ledger(),
        };
        events.done(result);
        report
    }
}

/// 单个文件的传输循环
async fn transfer_file(
    ctx: &RunContext<'_>,
    index: usize,
    item: &UploadItem,
) -> Result<TransferOutcome, Cancelled> {
    if item.size_bytes >= MAX_FILE_SIZE {
        return Ok(TransferOutcome::Skipped("too-large".into()));
    }
    if ctx.config.dry_run {
        return Ok(TransferOutcome::DryRun);
    }

    let content = match tokio::fs::read(&item.local_path).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(TransferOutcome::Failed(format!("read-error: {}", e))),
    };

    let message =
        ctx.config
            .render_file_message(&item.file_name(), &item.repo_path, index + 1, ctx.total());
    let delay = ctx.config.delay();
    let mut retry = RetryState::new(delay, MAX_FILE_ATTEMPTS);

    while retry.begin_attempt() {
        ctx.gate.checkpoint().await?;

        ctx.gate.sleep(delay).await?;
        let hash = match ctx.remote.fetch_hash(&item.repo_path).await {
            Ok(hash) => hash,
            Err(e) => match back_off(ctx, &mut retry, &e, "获取 hash").await? {
                Some(detail) => return Ok(TransferOutcome::Failed(detail)),
                None => continue,
            },
        };

        ctx.gate.sleep(delay).await?;
        match ctx
            .remote
            .write_content(&item.repo_path, &content, &message, hash.as_deref())
            .await
        {
            Ok(()) => return Ok(TransferOutcome::Committed(content.len() as u64)),
            Err(e) => {
                if let Some(detail) = back_off(ctx, &mut retry, &e, "上传").await? {
                    return Ok(TransferOutcome::Failed(detail));
                }
            }
        }
    }

    Ok(TransferOutcome::Failed("gave-up".into()))
}

/// 按失败类别等待；返回 `Some(detail)` 表示放弃
pub(crate) async fn back_off(
    ctx: &RunContext<'_>,
    retry: &mut RetryState,
    err: &RemoteError,
    what: &str,
) -> Result<Option<String>, Cancelled> {
    match retry.on_error(err) {
        RetryDecision::Retry { delay, kind } => {
            ctx.events.warn(format!(
                "⚠️  {}失败 ({:?}, 第 {}/{} 次) – 等待 {:.1}s: {}",
                what,
                kind,
                retry.attempt,
                retry.max_attempts,
                delay.as_secs_f64(),
                err
            ));
            ctx.gate.sleep(delay).await?;
            Ok(None)
        }
        RetryDecision::GiveUp { detail } => Ok(Some(detail)),
    }
}

/// 读-改-写会话日志；失败只记录，不影响运行结果
async fn push_session_log(ctx: &RunContext<'_>, block: &str) {
    let config = ctx.config;
    let path = config.log_path();
    let header = session_log::log_header(&config.owner, &config.repo, &config.branch);
    let mut retry = RetryState::new(config.delay(), MAX_FILE_ATTEMPTS);

    ctx.events.info("📋 正在更新 files.log…");

    while retry.begin_attempt() {
        if ctx.gate.checkpoint().await.is_err() {
            return;
        }

        let existing = match ctx.remote.fetch_content(&path).await {
            Ok(existing) => existing,
            Err(e) => match back_off(ctx, &mut retry, &e, "读取 files.log").await {
                Ok(None) => continue,
                Ok(Some(detail)) => {
                    ctx.events.warn(format!("⚠️  files.log 错误（不影响结果）: {}", detail));
                    return;
                }
                Err(Cancelled) => return,
            },
        };

        let full = session_log::compose(existing.as_ref().map(|c| c.text.as_str()), &header, block);
        if ctx.gate.sleep(config.delay()).await.is_err() {
            return;
        }

        let expected = existing.as_ref().map(|c| c.hash.as_str());
        match ctx
            .remote
            .write_content(&path, full.as_bytes(), LOG_COMMIT_MESSAGE, expected)
            .await
        {
            Ok(()) => {
                ctx.events.info(format!("📋 files.log 已更新 → {}", path));
                return;
            }
            Err(e) => match back_off(ctx, &mut retry, &e, "写入 files.log").await {
                Ok(None) => continue,
                Ok(Some(detail)) => {
                    ctx.events.warn(format!("⚠️  files.log 错误（不影响结果）: {}", detail));
                    return;
                }
                Err(Cancelled) => return,
            },
        }
    }

    ctx.events.warn("⚠️  files.log 更新放弃（不影响结果）");
}

/// 单提交模式下，已暂存文件在日志中按已提交显示
pub(crate) fn staged_row(item: &UploadItem) -> LogRow {
    LogRow::new(item, TransferOutcome::Committed(item.size_bytes).icon())
}
