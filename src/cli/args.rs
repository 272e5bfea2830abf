use crate::config::{parse_patterns, ConfigFile, DisposalMode, TransferMode, UploadConfig};
use crate::logging::LogConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("缺少必需参数: --{0}（或在配置文件中提供）")]
    Missing(&'static str),
    #[error("环境变量 {0} 未设置或为空")]
    MissingToken(String),
    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Incremental,
    Atomic,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => TransferMode::Incremental,
            ModeArg::Atomic => TransferMode::Atomic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisposeArg {
    None,
    Recycle,
    Permanent,
}

impl From<DisposeArg> for DisposalMode {
    fn from(mode: DisposeArg) -> Self {
        match mode {
            DisposeArg::None => DisposalMode::None,
            DisposeArg::Recycle => DisposalMode::Recycle,
            DisposeArg::Permanent => DisposalMode::Permanent,
        }
    }
}

/// 把本地目录上传到 GitHub 仓库
#[derive(Debug, Parser)]
#[command(name = "ghupload", version, about)]
pub struct Cli {
    /// JSON 配置文件；命令行参数覆盖其中的值
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub repo: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// 本地根目录
    #[arg(short, long)]
    pub local: Option<PathBuf>,

    /// 仓库内目标目录
    #[arg(long)]
    pub prefix: Option<String>,

    /// 排除规则，可重复；每个值也可以用逗号分隔多条
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// 提交信息模板（{filename} {filepath} {index} {total}）
    #[arg(short, long)]
    pub message: Option<String>,

    /// 每次 API 调用前的等待秒数
    #[arg(long)]
    pub delay: Option<f64>,

    #[arg(long)]
    pub dry_run: bool,

    /// 不写 files.log
    #[arg(long)]
    pub no_log: bool,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// 上传成功后的本地处理
    #[arg(long, value_enum)]
    pub dispose: Option<DisposeArg>,

    /// 读取令牌的环境变量名
    #[arg(long, default_value = "GITHUB_TOKEN")]
    pub token_env: String,

    #[arg(long)]
    pub api_base: Option<String>,
}

impl Cli {
    /// 合并配置文件与命令行参数
    pub fn resolve(&self) -> Result<ConfigFile, ArgsError> {
        let mut file = match &self.config {
            Some(path) => UploadConfig::load(path)?,
            None => {
                let owner = self.owner.as_deref().ok_or(ArgsError::Missing("owner"))?;
                let repo = self.repo.as_deref().ok_or(ArgsError::Missing("repo"))?;
                let local = self.local.clone().ok_or(ArgsError::Missing("local"))?;
                ConfigFile {
                    upload: UploadConfig::new(owner, repo, local),
                    log: LogConfig::default(),
                }
            }
        };

        let cfg = &mut file.upload;
        if let Some(owner) = &self.owner {
            cfg.owner = owner.clone();
        }
        if let Some(repo) = &self.repo {
            cfg.repo = repo.clone();
        }
        if let Some(branch) = &self.branch {
            cfg.branch = branch.clone();
        }
        if let Some(local) = &self.local {
            cfg.local_root = local.clone();
        }
        if let Some(prefix) = &self.prefix {
            cfg.target_prefix = prefix.clone();
        }
        for raw in &self.exclude {
            cfg.exclude_patterns.extend(parse_patterns(raw));
        }
        if let Some(message) = &self.message {
            cfg.commit_message = Some(message.clone());
        }
        if let Some(delay) = self.delay {
            cfg.delay_secs = delay;
        }
        if self.dry_run {
            cfg.dry_run = true;
        }
        if self.no_log {
            cfg.write_session_log = false;
        }
        if let Some(mode) = self.mode {
            cfg.mode = mode.into();
        }
        if let Some(dispose) = self.dispose {
            cfg.disposal = dispose.into();
        }
        if let Some(api_base) = &self.api_base {
            cfg.api_base = api_base.clone();
        }

        Ok(file)
    }

    /// 从环境变量读取访问令牌
    pub fn token(&self) -> Result<String, ArgsError> {
        std::env::var(&self.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ArgsError::MissingToken(self.token_env.clone()))
    }
}
