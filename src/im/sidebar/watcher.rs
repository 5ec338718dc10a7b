//! 侧边栏变更订阅

use crate::im::conversation::ConversationResolver;
use crate::im::friend::FriendService;
use crate::im::remote::{ChannelHandle, Remotes, SidebarChange};
use crate::im::sidebar::listener::SidebarListener;
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 持有侧边栏订阅与刷新任务；停止或释放时退订
pub struct SidebarWatcher {
    handles: Vec<Arc<dyn ChannelHandle>>,
    pump: JoinHandle<()>,
    stopped: bool,
}

impl SidebarWatcher {
    pub async fn start(
        user_id: &str,
        remotes: &Remotes,
        listener: Arc<dyn SidebarListener>,
    ) -> Result<Self> {
        let feed = remotes.realtime.subscribe_sidebar(user_id).await?;
        info!("[Sidebar] 📡 开始监听 {} 的好友与会话变更", user_id);

        let friends = FriendService::new(remotes.friends.clone(), user_id);
        let resolver = ConversationResolver::new(remotes.conversations.clone());
        let me = user_id.to_string();
        let mut events = feed.events;
        let pump = tokio::spawn(async move {
            while let Some(change) = events.recv().await {
                debug!("[Sidebar] 收到变更 {:?}", change);
                match change {
                    SidebarChange::FriendRequests => {
                        // 请求被接受时好友列表也会变化
                        refresh_requests(&friends, listener.as_ref()).await;
                        refresh_friends(&friends, listener.as_ref()).await;
                    }
                    SidebarChange::Friendships => refresh_friends(&friends, listener.as_ref()).await,
                    SidebarChange::Memberships => match resolver.list_conversations(&me).await {
                        Ok(conversations) => listener.on_conversations_changed(conversations).await,
                        Err(e) => error!("[Sidebar] 刷新会话列表失败: {}", e),
                    },
                }
            }
            debug!("[Sidebar] 变更订阅已结束");
        });

        Ok(Self {
            handles: feed.handles,
            pump,
            stopped: false,
        })
    }

    pub async fn stop(&mut self) {
        self.pump.abort();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.unsubscribe().await {
                error!("[Sidebar] 退订 {} 失败: {}", handle.topic(), e);
            }
        }
        self.stopped = true;
        info!("[Sidebar] 停止监听");
    }
}

impl Drop for SidebarWatcher {
    fn drop(&mut self) {
        self.pump.abort();
        if self.stopped || self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for handle in handles {
                    let _ = handle.unsubscribe().await;
                }
            });
        }
    }
}

async fn refresh_requests(friends: &FriendService, listener: &dyn SidebarListener) {
    match friends.pending_requests().await {
        Ok(requests) => listener.on_friend_requests_changed(requests).await,
        Err(e) => error!("[Sidebar] 刷新好友请求失败: {}", e),
    }
}

async fn refresh_friends(friends: &FriendService, listener: &dyn SidebarListener) {
    match friends.friends().await {
        Ok(list) => listener.on_friends_changed(list).await,
        Err(e) => error!("[Sidebar] 刷新好友列表失败: {}", e),
    }
}
