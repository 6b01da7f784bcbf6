use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 所有后台循环订阅同一个广播通道，`shutdown` 只会生效一次。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: broadcast::Sender<()>,
    is_shutdown: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// 订阅关闭信号，已关闭时返回的接收器会立即收到信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        if *self.is_shutdown.read().await {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.sender.subscribe()
    }

    /// 供需要自行订阅的组件使用，例如主控大脑的两个循环
    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.sender
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        *is_shutdown = true;

        let subscribers = self.sender.receiver_count();
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(());
        info!("关闭信号已发送给 {} 个订阅者", subscribers);
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_all_subscribers_receive_signal() {
        let manager = ShutdownManager::new();
        let mut rx1 = manager.subscribe().await;
        let mut rx2 = manager.sender().subscribe();

        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), rx1.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.recv()).await.is_ok());
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_double_shutdown_is_noop() {
        let manager = ShutdownManager::new();
        let cloned = manager.clone();
        manager.shutdown().await;
        cloned.shutdown().await;
        assert!(cloned.is_shutdown().await);
    }
}
