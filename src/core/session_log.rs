//! 会话日志（files.log）的文本拼装
//!
//! 只负责文本组合；读-改-写由调用方完成。

use crate::models::{ItemOutcome, UploadItem};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::time::Duration;

/// 会话日志的提交信息
pub const LOG_COMMIT_MESSAGE: &str = "chore: update files.log [skip ci]";

/// 会话块中的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub committed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub deleted: u32,
}

/// 会话块中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub icon: &'static str,
    pub path: String,
    pub size: String,
}

impl LogRow {
    pub fn new(item: &UploadItem, icon: &'static str) -> Self {
        Self {
            icon,
            path: item.repo_path.clone(),
            size: human_size(item.size_bytes),
        }
    }

    pub fn from_outcome(outcome: &ItemOutcome) -> Self {
        Self::new(&outcome.item, outcome.outcome.icon())
    }
}

/// 字节数的可读形式
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut n = bytes as f64 / 1024.0;
    for unit in ["KB", "MB", "GB"] {
        if n < 1024.0 {
            return format!("{:.1} {}", n, unit);
        }
        n /= 1024.0;
    }
    format!("{:.1} TB", n)
}

/// 耗时，例如 `3m 07s` 或 `42s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (m, s) = (secs / 60, secs % 60);
    if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// 按已完成速度估算剩余时间
pub fn eta(done: usize, total: usize, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if done == 0 || secs < 0.1 {
        return "ETA: —".to_string();
    }
    let rate = done as f64 / secs;
    let remaining = (total.saturating_sub(done) as f64 / rate) as u64;
    let (m, s) = (remaining / 60, remaining % 60);
    if m > 0 {
        format!("ETA: {}m {:02}s", m, s)
    } else {
        format!("ETA: {}s", s)
    }
}

/// 日志文件首次创建时的文档头
pub fn log_header(owner: &str, repo: &str, branch: &str) -> String {
    format!(
        "# 📋 Upload Log — `{}/{}` (`{}`)\n\n> Auto-generated by **ghupload**. Appended each session.\n\n",
        owner, repo, branch
    )
}

/// 生成一次会话的日志块
pub fn session_block(
    rows: &[LogRow],
    counts: BlockCounts,
    elapsed: Duration,
    dry_run: bool,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let tag = if dry_run { " *(dry run)*" } else { "" };

    // 写入 String 不会失败
    let _ = write!(
        out,
        "---\n\n## 🚀 Session — {}{}\n\n",
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        tag
    );
    out.push_str("| Stat | Value |\n|------|-------|\n");
    let _ = writeln!(out, "| ✅ Committed | {} |", counts.committed);
    let _ = writeln!(out, "| ❌ Failed | {} |", counts.failed);
    let _ = writeln!(out, "| ⏭️ Skipped | {} |", counts.skipped);
    let _ = writeln!(out, "| 🗑️ Deleted locally | {} |", counts.deleted);
    let _ = write!(out, "| ⏱️ Elapsed | {} |\n\n", format_elapsed(elapsed));
    out.push_str("### Files\n\n| Status | Path | Size |\n|--------|------|------|\n");
    for row in rows {
        let _ = writeln!(out, "| {} | `{}` | {} |", row.icon, row.path, row.size);
    }
    out.push('\n');
    out
}

/// 追加到已有内容之后；不存在时先写文档头
pub fn compose(existing: Option<&str>, header: &str, block: &str) -> String {
    match existing {
        Some(text) => format!("{}{}", text, block),
        None => format!("{}{}", header, block),
    }
}

/// 从结果列表生成日志行
pub fn rows_for(outcomes: &[ItemOutcome]) -> Vec<LogRow> {
    outcomes.iter().map(LogRow::from_outcome).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(150 * 1024 * 1024), "150.0 MB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024 * 1024), "3.0 TB");
    }

    #[test]
    fn test_format_elapsed_and_eta() {
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(187)), "3m 07s");
        assert_eq!(eta(0, 10, Duration::from_secs(5)), "ETA: —");
        assert_eq!(eta(2, 10, Duration::from_secs(10)), "ETA: 40s");
        assert_eq!(eta(1, 10, Duration::from_secs(30)), "ETA: 4m 30s");
    }

    #[test]
    fn test_session_block_layout() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).unwrap();
        let rows = vec![
            LogRow {
                icon: "✅",
                path: "docs/a.txt".into(),
                size: "12 B".into(),
            },
            LogRow {
                icon: "⏭️",
                path: "docs/big.iso".into(),
                size: "150.0 MB".into(),
            },
        ];
        let counts = BlockCounts {
            committed: 1,
            failed: 0,
            skipped: 1,
            deleted: 0,
        };
        let block = session_block(&rows, counts, Duration::from_secs(65), true, now);

        assert!(block.starts_with("---\n\n## 🚀 Session — 2026-03-01 08:05:09 UTC *(dry run)*\n\n"));
        assert!(block.contains("| ✅ Committed | 1 |\n"));
        assert!(block.contains("| ⏱️ Elapsed | 1m 05s |\n\n### Files"));
        assert!(block.contains("| ⏭️ | `docs/big.iso` | 150.0 MB |\n"));
        assert!(block.ends_with("|\n\n"));
    }

    #[test]
    fn test_compose_writes_header_once() {
        let header = log_header("me", "files", "main");
        let first = compose(None, &header, "B1");
        assert!(first.starts_with("# 📋 Upload Log — `me/files` (`main`)"));
        let second = compose(Some(&first), &header, "B2");
        assert_eq!(second.matches("# 📋 Upload Log").count(), 1);
        assert!(second.ends_with("B1B2"));
    }
}
