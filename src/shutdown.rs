use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// 默认等待组件退出的时间
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 优雅关闭管理器
///
/// 调度循环和响应监听器各自订阅关闭信号；触发后调度循环在当前轮次结束时退出，
/// 监听器等待在途处理完成。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            timeout,
        }
    }

    /// 订阅关闭信号；已关闭时返回立即触发的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.shutdown_tx.read().await.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭，重复调用无效
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            debug!("关闭信号已发送过");
            return;
        };
        debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
        // 没有接收者时发送失败，可以忽略
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.read().await.is_none()
    }

    /// 在超时内等待 `fut` 完成；超时返回 `false`
    pub async fn wait_for<F>(&self, fut: F) -> bool
    where
        F: Future,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(_) => true,
            Err(_) => {
                warn!("等待组件退出超时（{:?}）", self.timeout);
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}
