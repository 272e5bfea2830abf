//! 暂停/取消控制
//!
//! 取消是一次性闩锁（`CancellationToken`），暂停是轮询的标志位。
//! 工作任务在每个循环头和每次等待之后调用 [`ConcurrencyGate::checkpoint`]。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 运行已被取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("操作已取消")]
pub struct Cancelled;

/// 工作任务一侧的控制门
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    poll: Duration,
}

/// 调用方一侧的控制句柄
#[derive(Debug, Clone)]
pub struct GateHandle {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl ConcurrencyGate {
    pub fn new(poll: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            poll: poll.max(Duration::from_millis(1)),
        }
    }

    pub fn handle(&self) -> GateHandle {
        GateHandle {
            cancel: self.cancel.clone(),
            paused: self.paused.clone(),
        }
    }

    /// 供阻塞线程中的扫描器检查取消
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// 暂停期间轮询等待；已取消（包括暂停中被取消）时返回 `Err(Cancelled)`
    pub async fn checkpoint(&self) -> Result<(), Cancelled> {
        loop {
            if self.is_cancelled() {
                return Err(Cancelled);
            }
            if !self.is_paused() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }

    /// 可被取消的等待，结束后再经过一次 checkpoint
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if !duration.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(duration) => {}
            }
        }
        self.checkpoint().await
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

impl GateHandle {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// 取消不可撤销
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_checkpoint_passes_when_idle() {
        let gate = ConcurrencyGate::new(Duration::from_millis(5));
        assert!(gate.checkpoint().await.is_ok());
        assert!(gate.sleep(Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_is_cut_short_by_cancel() {
        let gate = ConcurrencyGate::new(Duration::from_millis(5));
        let handle = gate.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let started = Instant::now();
        assert_eq!(gate.sleep(Duration::from_secs(30)).await, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_while_paused_exits() {
        let gate = ConcurrencyGate::new(Duration::from_millis(5));
        let handle = gate.handle();
        handle.pause();
        assert!(gate.is_paused());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        handle.cancel();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));
    }
}
