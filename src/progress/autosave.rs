//! 自动保存：后台循环定期 flush 进度存储
//!
//! 与请求路径只通过 [`ProgressStore`] 自身的锁协作。失败只记日志、短暂停顿后继续，
//! 不会终止循环；意外退出时最多丢失一个周期内的修改。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::ProgressStore;
use crate::config::StorageSection;

pub struct AutosaveScheduler {
    store: Arc<ProgressStore>,
    interval: Duration,
    retry_pause: Duration,
}

impl AutosaveScheduler {
    pub fn new(store: Arc<ProgressStore>, interval: Duration, retry_pause: Duration) -> Self {
        Self {
            store,
            interval,
            retry_pause,
        }
    }

    pub fn from_config(store: Arc<ProgressStore>, section: &StorageSection) -> Self {
        Self::new(
            store,
            section.autosave_interval(),
            section.autosave_retry_pause(),
        )
    }

    /// 在独立任务中运行，token 取消后退出
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            "Autosave started: every {:?} to {}",
            self.interval,
            self.store.path().display()
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.store.flush().await {
                Ok(()) => tracing::debug!("Autosave flush ok"),
                Err(e) => {
                    tracing::error!("Autosave flush failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_pause) => {}
                    }
                }
            }
        }
        tracing::info!("Autosave stopped");
    }
}
