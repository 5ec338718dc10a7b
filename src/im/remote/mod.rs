//! 远程服务接口
//!
//! 消息存储、实时变更推送、presence、好友关系、对象存储都由外部平台提供。
//! 这里只定义 SDK 依赖的最小调用面：REST/WebSocket 实现位于各业务模块的 `api`，
//! `memory` 提供进程内实现，供测试与离线演示使用。

pub mod memory;

use crate::im::conversation::models::{ChatMember, Conversation, NewConversation};
use crate::im::friend::models::{FriendRequest, RequestResponse};
use crate::im::message::models::{Message, MessageChange, MessageEdit, NewMessage};
use crate::im::message::reactions::ReactionRow;
use crate::im::message::receipts::ReadReceipt;
use crate::im::presence::{PresencePayload, Profile};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::MemoryBackend;

/// 消息表的请求/响应接口
#[async_trait]
pub trait MessageRemote: Send + Sync {
    /// 拉取会话全部消息（按创建时间升序）
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// 发送消息，返回服务端分配了 ID 的记录
    async fn send_message(&self, msg: &NewMessage) -> Result<Message>;

    /// 编辑消息（仅限发送者本人）
    async fn edit_message(&self, message_id: &str, sender_id: &str, edit: &MessageEdit)
        -> Result<()>;

    /// 删除消息（仅限发送者本人）
    async fn delete_message(&self, message_id: &str, sender_id: &str) -> Result<()>;
}

/// 表情回应接口
#[async_trait]
pub trait ReactionRemote: Send + Sync {
    async fn fetch_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>>;

    async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()>;

    /// 删除用户在该消息上的回应；`emoji` 为 None 时删除全部
    async fn remove_reactions(&self, message_id: &str, user_id: &str, emoji: Option<&str>)
        -> Result<()>;
}

/// 已读回执接口
#[async_trait]
pub trait ReceiptRemote: Send + Sync {
    async fn upsert_reads(&self, reads: &[ReadReceipt]) -> Result<()>;

    /// 给定消息中用户已读的 ID
    async fn read_message_ids(&self, user_id: &str, message_ids: &[String]) -> Result<Vec<String>>;
}

/// 会话与成员关系接口
#[async_trait]
pub trait ConversationRemote: Send + Sync {
    /// 用户所在的全部会话 ID
    async fn membership_chat_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// 按 ID 批量获取会话（按创建时间倒序）
    async fn fetch_conversations(&self, ids: &[String]) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation>;

    async fn add_members(&self, members: &[ChatMember]) -> Result<()>;

    /// 会话全部成员的用户 ID
    async fn member_ids(&self, chat_id: &str) -> Result<Vec<String>>;

    async fn update_default_vanish(&self, chat_id: &str, hours: Option<i64>) -> Result<()>;
}

/// 频道订阅句柄
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn topic(&self) -> &str;

    /// 释放订阅；之后不会再收到任何事件
    async fn unsubscribe(&self) -> Result<()>;
}

/// presence 频道：在订阅句柄的基础上可以发布本地状态
#[async_trait]
pub trait PresenceChannel: ChannelHandle {
    async fn track(&self, payload: &PresencePayload) -> Result<()>;
}

/// 消息变更订阅
pub struct MessageFeed {
    pub events: mpsc::UnboundedReceiver<MessageChange>,
    pub handle: Arc<dyn ChannelHandle>,
}

/// presence 订阅：每次同步后推送完整快照
pub struct PresenceFeed {
    pub snapshots: mpsc::UnboundedReceiver<Vec<PresencePayload>>,
    pub channel: Arc<dyn PresenceChannel>,
}

/// 侧边栏关心的表变更（均按当前用户过滤）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidebarChange {
    /// friend_requests 中发给本人的请求
    FriendRequests,
    /// friendships 中本人的好友关系
    Friendships,
    /// 本人被加入了新的会话（chat_members 插入）
    Memberships,
}

/// 侧边栏变更订阅：事件只说明哪张表变了，调用方自行重新拉取
pub struct SidebarFeed {
    pub events: mpsc::UnboundedReceiver<SidebarChange>,
    pub handles: Vec<Arc<dyn ChannelHandle>>,
}

/// 实时推送接口
#[async_trait]
pub trait RealtimeRemote: Send + Sync {
    async fn subscribe_messages(&self, conversation_id: &str) -> Result<MessageFeed>;

    async fn join_presence(&self, conversation_id: &str) -> Result<PresenceFeed>;

    async fn subscribe_sidebar(&self, user_id: &str) -> Result<SidebarFeed>;
}

/// 好友请求、好友关系、拉黑与用户搜索接口
///
/// 所有方法都以 `user_id` 作为操作者。
#[async_trait]
pub trait FriendRemote: Send + Sync {
    async fn send_request(&self, sender_id: &str, receiver_id: &str) -> Result<()>;

    /// 发给 `user_id` 且尚未处理的请求（带发送者资料）
    async fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>>;

    /// `user_id` 发出且尚未处理的请求的接收者
    async fn pending_sent(&self, user_id: &str) -> Result<Vec<String>>;

    /// 接受后双方的好友关系由服务端建立
    async fn respond(&self, request_id: &str, answer: RequestResponse) -> Result<()>;

    async fn friends(&self, user_id: &str) -> Result<Vec<Profile>>;

    /// 用户名或显示名包含 `query`（不区分大小写）的用户，不含本人
    async fn search_profiles(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<Profile>>;

    /// 任一方向存在拉黑记录
    async fn is_blocked(&self, user_id: &str, target_id: &str) -> Result<bool>;

    async fn block(&self, user_id: &str, target_id: &str) -> Result<()>;

    async fn unblock(&self, user_id: &str, target_id: &str) -> Result<()>;
}

/// 对象存储接口
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// 上传对象，返回公开访问 URL
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;
}

/// 用户资料接口（在线时间、头像）
#[async_trait]
pub trait ProfileRemote: Send + Sync {
    async fn update_last_seen(&self) -> Result<()>;

    async fn update_avatar_url(&self, user_id: &str, url: Option<&str>) -> Result<()>;

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>>;
}

/// 一组远程服务实现
#[derive(Clone)]
pub struct Remotes {
    pub messages: Arc<dyn MessageRemote>,
    pub reactions: Arc<dyn ReactionRemote>,
    pub receipts: Arc<dyn ReceiptRemote>,
    pub conversations: Arc<dyn ConversationRemote>,
    pub realtime: Arc<dyn RealtimeRemote>,
    pub storage: Arc<dyn ObjectStorage>,
    pub profiles: Arc<dyn ProfileRemote>,
    pub friends: Arc<dyn FriendRemote>,
}

impl Remotes {
    /// 全部使用同一个进程内后端
    pub fn memory(backend: &MemoryBackend) -> Self {
        let backend = Arc::new(backend.clone());
        Self {
            messages: backend.clone(),
            reactions: backend.clone(),
            receipts: backend.clone(),
            conversations: backend.clone(),
            realtime: backend.clone(),
            storage: backend.clone(),
            profiles: backend.clone(),
            friends: backend,
        }
    }
}
