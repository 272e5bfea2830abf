use crate::config::UploadConfig;
use crate::models::UploadItem;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

/// 系统生成的文件名，总是跳过
pub const SKIP_NAMES: [&str; 4] = [".DS_Store", "Thumbs.db", "desktop.ini", ".gitkeep"];

/// 噪声扩展名（小写比较），总是跳过
pub const SKIP_EXTENSIONS: [&str; 5] = [".pyc", ".pyo", ".swp", ".swo", ".tmp"];

/// 单个文件大小上限（>= 即跳过）
pub const MAX_FILE_SIZE: u64 = 99 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("本地目录不存在: {0}")]
    RootMissing(PathBuf),
    #[error("无效的排除规则 `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("操作已取消")]
    Cancelled,
    #[error("扫描任务异常终止: {0}")]
    Worker(String),
}

/// 编译后的排除规则
#[derive(Debug, Clone)]
struct ExcludePattern {
    raw: String,
    regex: Regex,
}

/// 文件集合收集器
pub struct FileSetCollector {
    patterns: Vec<ExcludePattern>,
    prefix: String,
    cancel_flag: Option<CancellationToken>,
}

impl FileSetCollector {
    pub fn new(exclude_patterns: &[String], prefix: &str) -> Result<Self, ScanError> {
        let patterns = exclude_patterns
            .iter()
            .map(|p| {
                compile_pattern(p).map(|regex| ExcludePattern {
                    raw: p.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            prefix: prefix.trim_matches('/').to_string(),
            cancel_flag: None,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, ScanError> {
        Self::new(&config.exclude_patterns, config.prefix())
    }

    /// 设置取消标志
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel_flag = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    /// 检查文件是否应该被排除（`rel` 为 posix 风格相对路径）
    pub fn should_exclude(&self, name: &str, rel: &str) -> bool {
        if SKIP_NAMES.contains(&name) {
            return true;
        }

        if let Some(ext) = extension_of(name) {
            let ext = ext.to_lowercase();
            if SKIP_EXTENSIONS.contains(&ext.as_str()) {
                return true;
            }
        }

        self.patterns.iter().any(|p| {
            let hit = p.regex.is_match(name) || p.regex.is_match(rel);
            if hit {
                debug!("排除文件: {} (规则 {})", rel, p.raw);
            }
            hit
        })
    }

    /// 递归收集根目录下的所有普通文件，按路径排序
    pub fn collect(&self, root: &Path) -> Result<Vec<UploadItem>, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::RootMissing(root.to_path_buf()));
        }

        info!("开始扫描本地目录: {}", root.display());

        let mut found: Vec<(PathBuf, UploadItem)> = Vec::new();
        let mut excluded_count = 0;
        let mut unreadable_count = 0;

        for (n, entry) in WalkDir::new(root).min_depth(1).into_iter().enumerate() {
            // 每处理一定数量检查一次取消状态
            if n % 100 == 0 && self.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("无法读取条目: {}", e);
                    unreadable_count += 1;
                    continue;
                }
            };

            // 符号链接按目标判断
            let metadata = if entry.path_is_symlink() {
                fs::metadata(entry.path())
            } else {
                entry.metadata().map_err(std::io::Error::from)
            };
            let metadata = match metadata {
                Ok(m) => m,
                Err(e) => {
                    debug!("无法读取元数据: {}: {}", entry.path().display(), e);
                    unreadable_count += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel_posix = to_posix(rel);
            let name = entry.file_name().to_string_lossy();

            if self.should_exclude(&name, &rel_posix) {
                excluded_count += 1;
                continue;
            }

            found.push((
                rel.to_path_buf(),
                UploadItem {
                    local_path: entry.path().to_path_buf(),
                    repo_path: join_repo_path(&self.prefix, &rel_posix),
                    size_bytes: metadata.len(),
                },
            ));
        }

        // Path 的排序按路径分量逐个比较
        found.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            "扫描完成: {} 个文件, {} 个被排除, {} 个无法读取",
            found.len(),
            excluded_count,
            unreadable_count
        );

        Ok(found.into_iter().map(|(_, item)| item).collect())
    }
}

/// 单条 glob 规则匹配（`*` 可跨越 `/`，区分大小写）
pub fn matches_pattern(text: &str, pattern: &str) -> bool {
    compile_pattern(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// 拼接仓库路径
pub fn join_repo_path(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix, rel)
    }
}

fn to_posix(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 带点的扩展名，例如 `.tmp`；以点开头且没有其他点的文件名没有扩展名
fn extension_of(name: &str) -> Option<&str> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx == name.len() - 1 {
        return None;
    }
    Some(&name[idx..])
}

fn compile_pattern(pattern: &str) -> Result<Regex, ScanError> {
    Regex::new(&glob_to_regex(pattern)).map_err(|e| ScanError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// 把 fnmatch 风格的规则翻译为正则
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let len = chars.len();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < len {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                while i < len && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < len && chars[j] == '!' {
                    j += 1;
                }
                if j < len && chars[j] == ']' {
                    j += 1;
                }
                while j < len && chars[j] != ']' {
                    j += 1;
                }

                if j >= len {
                    // 没有闭合的 `[` 按字面量处理
                    out.push_str("\\[");
                    continue;
                }

                let mut body = &chars[i..j];
                i = j + 1;
                out.push('[');
                if body.first() == Some(&'!') {
                    out.push('^');
                    body = &body[1..];
                }
                for (k, ch) in body.iter().enumerate() {
                    match ch {
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(*ch);
                        }
                        '^' if k == 0 => out.push_str("\\^"),
                        _ => out.push(*ch),
                    }
                }
                out.push(']');
            }
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    out.push('$');
    out
}
