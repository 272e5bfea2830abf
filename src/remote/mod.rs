pub mod github;
pub mod memory;

use crate::core::retry::ErrorKind;
use crate::models::TreeEntry;
use async_trait::async_trait;
use thiserror::Error;

pub use github::GitHubClient;
pub use memory::{MemoryRemote, RemoteOp};

// ============ 公共常量 ============

/// 查询类请求超时（秒）
pub const LOOKUP_TIMEOUT_SECS: u64 = 30;
/// 写入类请求超时（秒）
pub const WRITE_TIMEOUT_SECS: u64 = 60;
/// 创建 tree 的超时（秒），条目多时较慢
pub const TREE_TIMEOUT_SECS: u64 = 120;

/// 远程调用错误
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("HTTP {status}: {detail}")]
    Api {
        status: u16,
        kind: ErrorKind,
        detail: String,
    },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Api { kind, .. } => *kind,
            RemoteError::Network(_) => ErrorKind::Network,
            RemoteError::Decode(_) => ErrorKind::Client,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// 远程文件的当前内容及其 hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub text: String,
    pub hash: String,
}

/// 远程数据 API 的无状态门面，目标仓库与分支在构造时确定
#[async_trait]
pub trait RemoteObjectClient: Send + Sync {
    /// 查询路径当前内容 hash；`None` 表示分支上不存在该路径
    async fn fetch_hash(&self, path: &str) -> Result<Option<String>, RemoteError>;

    /// 读取文本内容及 hash（用于会话日志的读-改-写）
    async fn fetch_content(&self, path: &str) -> Result<Option<RemoteContent>, RemoteError>;

    /// 在路径写入内容；`expected_hash` 不匹配时返回 `ErrorKind::Conflict`
    async fn write_content(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected_hash: Option<&str>,
    ) -> Result<(), RemoteError>;

    /// 分支当前指向的提交
    async fn branch_head(&self) -> Result<String, RemoteError>;

    /// 提交对应的 tree
    async fn commit_tree(&self, commit: &str) -> Result<String, RemoteError>;

    async fn create_blob(&self, content: &[u8]) -> Result<String, RemoteError>;

    async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, RemoteError>;

    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, RemoteError>;

    /// 把分支指向新提交（非强制）
    async fn move_ref(&self, commit: &str) -> Result<(), RemoteError>;

    /// 获取远程名称（用于日志）
    fn name(&self) -> &str;
}
