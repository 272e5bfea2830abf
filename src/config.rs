//! 运行配置模块
//!
//! 配置在运行开始时一次性构造，之后以不可变形式交给引擎；本模块只读取配置文件，从不回写。

use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 会话日志文件名
pub const FILES_LOG: &str = "files.log";
/// 每次调用前等待的上限（秒）
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// 传输模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// 每个文件一次提交
    #[default]
    Incremental,
    /// 整批一次提交
    Atomic,
}

/// 上传成功后的本地处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisposalMode {
    #[default]
    None,
    Recycle,
    Permanent,
}

/// 一次上传运行的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub local_root: PathBuf,
    /// 仓库内目标目录，首尾的 `/` 会被忽略
    #[serde(default)]
    pub target_prefix: String,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// 提交信息模板，支持 {filename} {filepath} {index} {total}
    #[serde(default)]
    pub commit_message: Option<String>,
    /// 每次 API 调用前的等待（秒），同时是退避的初始值
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub write_session_log: bool,
    #[serde(default)]
    pub disposal: DisposalMode,
    #[serde(default)]
    pub mode: TransferMode,
    /// 暂停时的轮询间隔（毫秒）
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_delay_secs() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_pause_poll_ms() -> u64 {
    300
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

/// 配置文件的整体结构（运行配置 + 可选的日志配置）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(flatten)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl UploadConfig {
    pub fn new(owner: &str, repo: &str, local_root: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: default_branch(),
            local_root: local_root.into(),
            target_prefix: String::new(),
            exclude_patterns: Vec::new(),
            commit_message: None,
            delay_secs: default_delay_secs(),
            dry_run: false,
            write_session_log: true,
            disposal: DisposalMode::None,
            mode: TransferMode::Incremental,
            pause_poll_ms: default_pause_poll_ms(),
            api_base: default_api_base(),
        }
    }

    /// 从 JSON 文件读取配置
    pub fn load(path: &Path) -> Result<ConfigFile> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(file)
    }

    /// 检查配置是否可用于运行
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            bail!("owner 不能为空");
        }
        if self.repo.trim().is_empty() {
            bail!("repo 不能为空");
        }
        if self.branch.trim().is_empty() {
            bail!("branch 不能为空");
        }
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            bail!("delaySecs 必须是非负数: {}", self.delay_secs);
        }
        if self.delay_secs > MAX_DELAY_SECS {
            bail!("delaySecs 不能超过 {}: {}", MAX_DELAY_SECS, self.delay_secs);
        }
        if !self.local_root.is_dir() {
            bail!("本地目录不存在: {}", self.local_root.display());
        }
        Ok(())
    }

    /// 规范化后的目标前缀
    pub fn prefix(&self) -> &str {
        self.target_prefix.trim_matches('/')
    }

    /// 会话日志在仓库中的路径
    pub fn log_path(&self) -> String {
        match self.prefix() {
            "" => FILES_LOG.to_string(),
            prefix => format!("{}/{}", prefix, FILES_LOG),
        }
    }

    /// 未经校验的配置也不会 panic：越界值被截断到 `[0, MAX_DELAY_SECS]`
    pub fn delay(&self) -> Duration {
        let secs = if self.delay_secs.is_nan() {
            0.0
        } else {
            self.delay_secs.clamp(0.0, MAX_DELAY_SECS)
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    /// 渲染逐文件提交信息
    pub fn render_file_message(&self, file_name: &str, repo_path: &str, index: usize, total: usize) -> String {
        let template = self
            .commit_message
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Upload {filename}");
        template
            .replace("{filename}", file_name)
            .replace("{filepath}", repo_path)
            .replace("{index}", &index.to_string())
            .replace("{total}", &total.to_string())
    }

    /// 渲染单提交模式的提交信息（仅替换 {total}）
    pub fn render_batch_message(&self, total: usize) -> String {
        self.commit_message
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("Bulk upload via ghupload")
            .replace("{total}", &total.to_string())
    }
}

/// 解析排除规则文本：逗号或换行分隔，忽略空行和 `#` 注释
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.replace(',', "\n")
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.starts_with('#'))
        .map(String::from)
        .collect()
}
