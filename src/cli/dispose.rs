use crate::config::DisposalMode;
use crate::core::notify::Disposer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 基于本地文件系统的处理：移入回收目录或直接删除
pub struct FsDisposer {
    mode: DisposalMode,
    recycle_dir: PathBuf,
}

impl FsDisposer {
    pub fn new(mode: DisposalMode, recycle_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            recycle_dir: recycle_dir.into(),
        }
    }

    /// 使用数据目录下的 `recycle/`
    pub fn in_data_dir(mode: DisposalMode) -> Self {
        Self::new(mode, crate::logging::get_data_dir().join("recycle"))
    }

    pub fn recycle_dir(&self) -> &Path {
        &self.recycle_dir
    }

    /// `<时间戳>_<文件名>`，重名时追加序号
    fn recycle_target(&self, path: &Path) -> PathBuf {
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut target = self.recycle_dir.join(format!("{}_{}", ts, name));
        let mut n = 1;
        while target.exists() {
            target = self.recycle_dir.join(format!("{}_{}_{}", ts, n, name));
            n += 1;
        }
        target
    }

    async fn recycle(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.recycle_dir)
            .await
            .with_context(|| format!("无法创建回收目录: {}", self.recycle_dir.display()))?;

        let target = self.recycle_target(path);
        if tokio::fs::rename(path, &target).await.is_err() {
            // 跨设备时退化为复制后删除
            tokio::fs::copy(path, &target)
                .await
                .with_context(|| format!("无法复制到回收目录: {}", path.display()))?;
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("无法删除原文件: {}", path.display()))?;
        }
        debug!("已回收: {} -> {}", path.display(), target.display());
        Ok(())
    }
}

#[async_trait]
impl Disposer for FsDisposer {
    async fn dispose(&self, local_path: &Path) -> Result<()> {
        match self.mode {
            DisposalMode::None => Ok(()),
            DisposalMode::Recycle => self.recycle(local_path).await,
            DisposalMode::Permanent => tokio::fs::remove_file(local_path)
                .await
                .with_context(|| format!("无法删除: {}", local_path.display())),
        }
    }
}
