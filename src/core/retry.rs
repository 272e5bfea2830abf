//! 远程调用失败分类与退避计算

use crate::remote::RemoteError;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;

/// 逐文件模式的最大尝试次数
pub const MAX_FILE_ATTEMPTS: u32 = 7;
/// 单提交模式中 blob/tree/commit/ref 创建的最大尝试次数
pub const MAX_CREATE_ATTEMPTS: u32 = 4;
/// 服务端错误退避上限
pub const SERVER_BACKOFF_CAP: Duration = Duration::from_secs(120);
/// 限流退避上限
pub const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// 远程失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    RateLimited,
    /// 期望的内容 hash 与服务端不一致（目标被并发修改）
    Conflict,
    ServerError,
    Network,
    /// 校验失败等不可重试的错误
    Client,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ErrorKind::Client)
    }
}

/// 根据状态码、响应体片段和响应头对失败进行分类
pub fn classify(status: u16, body: &str, headers: &HeaderMap) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited,
        403 if is_rate_limit_403(body, headers) => ErrorKind::RateLimited,
        409 => ErrorKind::Conflict,
        // GitHub 对过期或缺失的 sha 返回 422
        422 if body.to_lowercase().contains("sha") => ErrorKind::Conflict,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Client,
    }
}

fn is_rate_limit_403(body: &str, headers: &HeaderMap) -> bool {
    if body.to_lowercase().contains("rate limit") {
        return true;
    }
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

/// 一次失败之后的处理决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待后重试
    Retry { delay: Duration, kind: ErrorKind },
    /// 终止该文件（不再重试）
    GiveUp { detail: String },
}

/// 单个文件传输循环内的重试状态，文件结束后即丢弃
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    backoff: Duration,
    call_delay: Duration,
}

impl RetryState {
    /// `call_delay` 同时作为退避初始值和冲突重试的固定间隔
    pub fn new(call_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            backoff: call_delay,
            call_delay,
        }
    }

    /// 开始下一次尝试；预算用尽时返回 false
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// 服务端错误/网络错误：先等待当前退避，再翻倍（上限 120s）
    pub fn server_error_delay(&mut self) -> Duration {
        let wait = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(SERVER_BACKOFF_CAP);
        wait
    }

    /// 限流：等待两倍退避，之后退避变为等待时间的两倍（上限 300s）
    pub fn rate_limit_delay(&mut self) -> Duration {
        let wait = self.backoff.saturating_mul(2);
        self.backoff = wait.saturating_mul(2).min(RATE_LIMIT_BACKOFF_CAP);
        wait
    }

    /// 根据失败类别决定下一步
    pub fn on_error(&mut self, err: &RemoteError) -> RetryDecision {
        let kind = err.kind();
        let delay = match kind {
            ErrorKind::RateLimited => self.rate_limit_delay(),
            ErrorKind::Conflict => self.call_delay,
            ErrorKind::ServerError | ErrorKind::Network => self.server_error_delay(),
            ErrorKind::Client => {
                return RetryDecision::GiveUp {
                    detail: err.to_string(),
                }
            }
        };
        RetryDecision::Retry { delay, kind }
    }
}
