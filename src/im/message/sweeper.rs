//! 过期消息清理
//!
//! 固定间隔检查本地存储，移除 `vanish_at` 已到的消息。只影响本地视图，
//! 服务端是否删除由平台负责。

use crate::im::message::listener::MessageListener;
use crate::im::message::store::{lock_store, SharedStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 默认清理间隔
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct ExpirySweeper {
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn spawn(
        store: SharedStore,
        period: Duration,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = lock_store(&store).sweep_expired(Utc::now());
                if !expired.is_empty() {
                    debug!("[Sweeper] 🔥 移除 {} 条过期消息", expired.len());
                    listener.on_messages_expired(expired).await;
                }
            }
        });
        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("[Sweeper] 停止过期清理");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
