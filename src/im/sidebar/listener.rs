//! 侧边栏监听器回调接口

use crate::im::conversation::Conversation;
use crate::im::friend::FriendRequest;
use crate::im::presence::Profile;
use async_trait::async_trait;

#[async_trait]
pub trait SidebarListener: Send + Sync {
    /// 收到的待处理好友请求（完整列表）
    async fn on_friend_requests_changed(&self, requests: Vec<FriendRequest>);

    /// 好友列表
    async fn on_friends_changed(&self, friends: Vec<Profile>);

    /// 会话列表（被加入新会话时）
    async fn on_conversations_changed(&self, conversations: Vec<Conversation>);
}

/// 空实现（默认监听器）
pub struct EmptySidebarListener;

#[async_trait]
impl SidebarListener for EmptySidebarListener {
    async fn on_friend_requests_changed(&self, _requests: Vec<FriendRequest>) {}
    async fn on_friends_changed(&self, _friends: Vec<Profile>) {}
    async fn on_conversations_changed(&self, _conversations: Vec<Conversation>) {}
}
