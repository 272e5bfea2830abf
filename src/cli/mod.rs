//! 命令行外壳：参数、本地处理与控制台输出

pub mod args;
pub mod dispose;

pub use args::{ArgsError, Cli, DisposeArg, ModeArg};
pub use dispose::FsDisposer;

use crate::core::events::{QueueEntry, UploadEvent};
use crate::core::session_log::{eta, format_elapsed, human_size};
use crate::models::{Classification, SessionResult};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// 把事件流渲染为逐行文本
///
/// 日志事件已经由 tracing 输出，这里不再重复打印。
pub struct ConsoleRenderer<W: Write> {
    out: W,
    queue: Vec<QueueEntry>,
    started: Instant,
    result: Option<SessionResult>,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            queue: Vec::new(),
            started: Instant::now(),
            result: None,
        }
    }

    pub fn handle(&mut self, event: &UploadEvent) -> io::Result<()> {
        match event {
            UploadEvent::Log { .. } | UploadEvent::Stats(_) => {}
            UploadEvent::Status(text) => writeln!(self.out, "» {}", text)?,
            UploadEvent::QueueInit(entries) => {
                self.queue = entries.clone();
                self.started = Instant::now();
                writeln!(self.out, "队列: {} 个文件", entries.len())?;
            }
            UploadEvent::ItemStatus { index, status } => {
                let path = self
                    .queue
                    .get(*index)
                    .map(|e| e.repo_path.as_str())
                    .unwrap_or("?");
                writeln!(self.out, "  {} {}", status.icon(), path)?;
            }
            UploadEvent::Progress { done, total } => {
                writeln!(
                    self.out,
                    "  [{}/{}] {}",
                    done,
                    total,
                    eta(*done, *total, self.started.elapsed())
                )?;
            }
            UploadEvent::Done(result) => {
                writeln!(
                    self.out,
                    "完成: ✅{} ❌{} ⏭️{} 🗑️{} • {} • {}",
                    result.committed,
                    result.failed,
                    result.skipped,
                    result.deleted,
                    human_size(result.bytes_transferred),
                    format_elapsed(Duration::from_millis(result.elapsed_ms))
                )?;
                self.result = Some(result.clone());
            }
        }
        self.out.flush()
    }

    pub fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }
}

/// 进程退出码：成功或空试运行为 0，部分成功为 2，其余为 1
pub fn exit_code(result: Option<&SessionResult>) -> i32 {
    match result.map(SessionResult::classification) {
        Some(Classification::Success) | Some(Classification::Nothing) => 0,
        Some(Classification::Partial) => 2,
        Some(Classification::Failure) | None => 1,
    }
}
