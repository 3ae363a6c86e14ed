use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有组件共享同一个取消令牌；分发器与调度器各自派生子令牌，
/// 触发关闭后它们停止拉取或触发，并在各自的宽限期内排空在途工作。
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 组件使用的关闭令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 触发关闭并在超时内等待 `work` 完成，返回是否按时完成
    pub async fn shutdown_within<F>(&self, limit: Duration, work: F) -> bool
    where
        F: std::future::Future<Output = ()>,
    {
        self.shutdown();

        match timeout(limit, work).await {
            Ok(()) => true,
            Err(_) => {
                warn!("等待组件关闭超时（{:?}），强制退出", limit);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_manager_basic() {
        let manager = ShutdownManager::new();
        let token = manager.token();

        assert!(!manager.is_shutdown());
        assert!(!token.is_cancelled());

        manager.shutdown();

        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_multiple_shutdown_calls() {
        let manager = ShutdownManager::new();

        manager.shutdown();
        manager.shutdown();

        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let manager = ShutdownManager::new();
        let cloned = manager.clone();

        let waiter = tokio::spawn(async move { cloned.wait_for_shutdown().await });
        manager.shutdown();

        assert!(timeout(Duration::from_secs(1), waiter).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_within_times_out() {
        let manager = ShutdownManager::new();

        let finished = manager
            .shutdown_within(Duration::from_secs(1), tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(!finished);

        let finished = manager
            .shutdown_within(Duration::from_secs(1), async {})
            .await;
        assert!(finished);
    }
}
