//! 进程内远程服务实现
//!
//! 行为尽量贴近真实平台：服务端分配 ID 与创建时间、按会话扇出变更事件、
//! 只允许发送者本人编辑/删除（不匹配时影响 0 行而不是报错）、
//! 接受好友请求时建立双向好友关系。
//! 多个客户端可以共享同一个 `MemoryBackend`（内部为 `Arc`）。

use crate::im::conversation::models::{ChatMember, Conversation, NewConversation};
use crate::im::friend::models::{BlockRecord, FriendRequest, RequestResponse, RequestStatus};
use crate::im::message::models::{Message, MessageChange, MessageEdit, NewMessage};
use crate::im::message::reactions::ReactionRow;
use crate::im::message::receipts::ReadReceipt;
use crate::im::presence::{PresencePayload, Profile};
use crate::im::remote::{
    ChannelHandle, ConversationRemote, FriendRemote, MessageFeed, MessageRemote, ObjectStorage,
    PresenceChannel, PresenceFeed, ProfileRemote, RealtimeRemote, ReactionRemote, ReceiptRemote,
    SidebarChange, SidebarFeed,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

type Subscribers<T> = Vec<(u64, mpsc::UnboundedSender<T>)>;

#[derive(Default)]
struct PresenceRoom {
    members: BTreeMap<u64, PresencePayload>,
    listeners: Subscribers<Vec<PresencePayload>>,
}

impl PresenceRoom {
    fn broadcast(&mut self) {
        let snapshot: Vec<PresencePayload> = self.members.values().cloned().collect();
        self.listeners
            .retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
    }
}

#[derive(Default)]
struct MemoryState {
    messages: Vec<Message>,
    message_subs: HashMap<String, Subscribers<MessageChange>>,
    presence: HashMap<String, PresenceRoom>,
    conversations: Vec<Conversation>,
    members: Vec<ChatMember>,
    reactions: Vec<ReactionRow>,
    reads: Vec<ReadReceipt>,
    objects: HashMap<(String, String), (Vec<u8>, String)>,
    avatars: HashMap<String, Option<String>>,
    profiles: Vec<Profile>,
    friend_requests: Vec<FriendRequest>,
    // (user_id, friend_id)，双向各一行
    friendships: Vec<(String, String)>,
    blocks: Vec<BlockRecord>,
    sidebar_subs: HashMap<String, Subscribers<SidebarChange>>,
    last_seen_updates: usize,
    next_handle: u64,
    offline: bool,
}

impl MemoryState {
    fn ensure_online(&self, op: &str) -> Result<()> {
        if self.offline {
            return Err(anyhow!("[MemoryBackend] {} 失败：后端不可用", op));
        }
        Ok(())
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn fan_out(&mut self, chat_id: &str, change: MessageChange) {
        if let Some(subs) = self.message_subs.get_mut(chat_id) {
            subs.retain(|(_, tx)| tx.send(change.clone()).is_ok());
        }
    }

    fn notify_sidebar(&mut self, user_id: &str, change: SidebarChange) {
        if let Some(subs) = self.sidebar_subs.get_mut(user_id) {
            subs.retain(|(_, tx)| tx.send(change).is_ok());
        }
    }

    /// 没有资料记录时只带 ID
    fn profile_or_bare(&self, user_id: &str) -> Profile {
        self.profiles
            .iter()
            .find(|p| p.id == user_id)
            .cloned()
            .unwrap_or_else(|| Profile {
                id: user_id.to_string(),
                username: None,
                display_name: None,
                avatar_url: None,
                last_seen: None,
            })
    }

    fn befriend(&mut self, user_id: &str, friend_id: &str) {
        let row = (user_id.to_string(), friend_id.to_string());
        if !self.friendships.contains(&row) {
            self.friendships.push(row);
        }
    }
}

/// 进程内后端
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    /// 模拟网络故障：之后所有请求都返回错误
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// 直接写入一条消息（不扇出事件），用于准备历史数据
    pub fn seed_message(&self, msg: Message) {
        self.state().messages.push(msg);
    }

    /// 直接向订阅者推送一条变更（模拟重复或迟到的推送）
    pub fn emit(&self, conversation_id: &str, change: MessageChange) {
        self.state().fan_out(conversation_id, change);
    }

    pub fn stored_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// 写入或替换一条用户资料
    pub fn seed_profile(&self, profile: Profile) {
        let mut state = self.state();
        state.profiles.retain(|p| p.id != profile.id);
        state.profiles.push(profile);
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations.clone()
    }

    pub fn members_of(&self, chat_id: &str) -> Vec<ChatMember> {
        self.state()
            .members
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn message_subscriber_count(&self, conversation_id: &str) -> usize {
        self.state()
            .message_subs
            .get(conversation_id)
            .map_or(0, |subs| subs.len())
    }

    pub fn sidebar_subscriber_count(&self, user_id: &str) -> usize {
        self.state()
            .sidebar_subs
            .get(user_id)
            .map_or(0, |subs| subs.len())
    }

    pub fn presence_members(&self, conversation_id: &str) -> Vec<PresencePayload> {
        self.state()
            .presence
            .get(conversation_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.state()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn avatar_url(&self, user_id: &str) -> Option<String> {
        self.state().avatars.get(user_id).cloned().flatten()
    }

    pub fn last_seen_updates(&self) -> usize {
        self.state().last_seen_updates
    }
}

#[async_trait]
impl MessageRemote for MemoryBackend {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let state = self.state();
        state.ensure_online("fetch_messages")?;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn send_message(&self, msg: &NewMessage) -> Result<Message> {
        let mut state = self.state();
        state.ensure_online("send_message")?;
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: msg.chat_id.clone(),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            created_at: Utc::now(),
            vanish_at: msg.vanish_at,
            reply_to: msg.reply_to.clone(),
            edited_at: None,
            original_content: None,
            audio_url: msg.audio_url.clone(),
            audio_duration: msg.audio_duration,
            file_url: msg.file_url.clone(),
            file_type: msg.file_type.clone(),
            file_name: msg.file_name.clone(),
        };
        debug!("[MemoryBackend] 新消息 {} -> {}", stored.id, stored.conversation_id);
        state.messages.push(stored.clone());
        state.fan_out(&msg.chat_id, MessageChange::Insert(stored.clone()));
        Ok(stored)
    }

    async fn edit_message(
        &self,
        message_id: &str,
        sender_id: &str,
        edit: &MessageEdit,
    ) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("edit_message")?;
        let updated = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.sender_id == sender_id)
            .map(|m| {
                edit.apply_to(m);
                m.clone()
            });
        if let Some(msg) = updated {
            let chat_id = msg.conversation_id.clone();
            state.fan_out(&chat_id, MessageChange::Update(msg));
        }
        Ok(())
    }

    async fn delete_message(&self, message_id: &str, sender_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("delete_message")?;
        let position = state
            .messages
            .iter()
            .position(|m| m.id == message_id && m.sender_id == sender_id);
        if let Some(idx) = position {
            let removed = state.messages.remove(idx);
            state.fan_out(
                &removed.conversation_id,
                MessageChange::Delete { id: removed.id },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ReactionRemote for MemoryBackend {
    async fn fetch_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        let state = self.state();
        state.ensure_online("fetch_reactions")?;
        Ok(state
            .reactions
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect())
    }

    async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("add_reaction")?;
        state.reactions.push(ReactionRow {
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn remove_reactions(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("remove_reactions")?;
        state.reactions.retain(|r| {
            !(r.message_id == message_id
                && r.user_id == user_id
                && emoji.map_or(true, |e| r.emoji == e))
        });
        Ok(())
    }
}

#[async_trait]
impl ReceiptRemote for MemoryBackend {
    async fn upsert_reads(&self, reads: &[ReadReceipt]) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("upsert_reads")?;
        for read in reads {
            if !state.reads.contains(read) {
                state.reads.push(read.clone());
            }
        }
        Ok(())
    }

    async fn read_message_ids(&self, user_id: &str, message_ids: &[String]) -> Result<Vec<String>> {
        let state = self.state();
        state.ensure_online("read_message_ids")?;
        Ok(state
            .reads
            .iter()
            .filter(|r| r.user_id == user_id && message_ids.contains(&r.message_id))
            .map(|r| r.message_id.clone())
            .collect())
    }
}

#[async_trait]
impl ConversationRemote for MemoryBackend {
    async fn membership_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state();
        state.ensure_online("membership_chat_ids")?;
        Ok(state
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.chat_id.clone())
            .collect())
    }

    async fn fetch_conversations(&self, ids: &[String]) -> Result<Vec<Conversation>> {
        let state = self.state();
        state.ensure_online("fetch_conversations")?;
        let mut found: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation> {
        let mut state = self.state();
        state.ensure_online("create_conversation")?;
        let created = Conversation {
            id: Uuid::new_v4().to_string(),
            conversation_type: conversation.conversation_type,
            name: conversation.name.clone(),
            created_by: conversation.created_by.clone(),
            default_vanish_hours: None,
            created_at: Some(Utc::now()),
        };
        state.conversations.push(created.clone());
        Ok(created)
    }

    async fn add_members(&self, members: &[ChatMember]) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("add_members")?;
        for member in members {
            let exists = state
                .members
                .iter()
                .any(|m| m.chat_id == member.chat_id && m.user_id == member.user_id);
            if exists {
                return Err(anyhow!(
                    "duplicate key value violates unique constraint (chat_id, user_id) = ({}, {})",
                    member.chat_id,
                    member.user_id
                ));
            }
        }
        state.members.extend(members.iter().cloned());
        for member in members {
            state.notify_sidebar(&member.user_id, SidebarChange::Memberships);
        }
        Ok(())
    }

    async fn member_ids(&self, chat_id: &str) -> Result<Vec<String>> {
        let state = self.state();
        state.ensure_online("member_ids")?;
        Ok(state
            .members
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.user_id.clone())
            .collect())
    }

    async fn update_default_vanish(&self, chat_id: &str, hours: Option<i64>) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("update_default_vanish")?;
        if let Some(conv) = state.conversations.iter_mut().find(|c| c.id == chat_id) {
            conv.default_vanish_hours = hours;
        }
        Ok(())
    }
}

/// 消息订阅句柄
struct MemoryMessageChannel {
    state: Arc<Mutex<MemoryState>>,
    topic: String,
    conversation_id: String,
    handle_id: u64,
}

#[async_trait]
impl ChannelHandle for MemoryMessageChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(subs) = state.message_subs.get_mut(&self.conversation_id) {
            subs.retain(|(id, _)| *id != self.handle_id);
        }
        Ok(())
    }
}

/// presence 订阅句柄
struct MemoryPresenceChannel {
    state: Arc<Mutex<MemoryState>>,
    topic: String,
    conversation_id: String,
    handle_id: u64,
}

#[async_trait]
impl ChannelHandle for MemoryPresenceChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(room) = state.presence.get_mut(&self.conversation_id) {
            room.listeners.retain(|(id, _)| *id != self.handle_id);
            if room.members.remove(&self.handle_id).is_some() {
                room.broadcast();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceChannel for MemoryPresenceChannel {
    async fn track(&self, payload: &PresencePayload) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_online("track")?;
        let room = state
            .presence
            .entry(self.conversation_id.clone())
            .or_default();
        room.members.insert(self.handle_id, payload.clone());
        room.broadcast();
        Ok(())
    }
}

/// 侧边栏订阅句柄
struct MemorySidebarChannel {
    state: Arc<Mutex<MemoryState>>,
    topic: String,
    user_id: String,
    handle_id: u64,
}

#[async_trait]
impl ChannelHandle for MemorySidebarChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(subs) = state.sidebar_subs.get_mut(&self.user_id) {
            subs.retain(|(id, _)| *id != self.handle_id);
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeRemote for MemoryBackend {
    async fn subscribe_messages(&self, conversation_id: &str) -> Result<MessageFeed> {
        let mut state = self.state();
        state.ensure_online("subscribe_messages")?;
        let handle_id = state.next_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .message_subs
            .entry(conversation_id.to_string())
            .or_default()
            .push((handle_id, tx));

        Ok(MessageFeed {
            events: rx,
            handle: Arc::new(MemoryMessageChannel {
                state: self.state.clone(),
                topic: format!("messages:{}", conversation_id),
                conversation_id: conversation_id.to_string(),
                handle_id,
            }),
        })
    }

    async fn join_presence(&self, conversation_id: &str) -> Result<PresenceFeed> {
        let mut state = self.state();
        state.ensure_online("join_presence")?;
        let handle_id = state.next_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        let room = state
            .presence
            .entry(conversation_id.to_string())
            .or_default();
        let snapshot: Vec<PresencePayload> = room.members.values().cloned().collect();
        let _ = tx.send(snapshot);
        room.listeners.push((handle_id, tx));

        Ok(PresenceFeed {
            snapshots: rx,
            channel: Arc::new(MemoryPresenceChannel {
                state: self.state.clone(),
                topic: format!("presence:{}", conversation_id),
                conversation_id: conversation_id.to_string(),
                handle_id,
            }),
        })
    }

    async fn subscribe_sidebar(&self, user_id: &str) -> Result<SidebarFeed> {
        let mut state = self.state();
        state.ensure_online("subscribe_sidebar")?;
        let handle_id = state.next_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .sidebar_subs
            .entry(user_id.to_string())
            .or_default()
            .push((handle_id, tx));

        let handle: Arc<dyn ChannelHandle> = Arc::new(MemorySidebarChannel {
            state: self.state.clone(),
            topic: format!("sidebar:{}", user_id),
            user_id: user_id.to_string(),
            handle_id,
        });
        Ok(SidebarFeed {
            events: rx,
            handles: vec![handle],
        })
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        let mut state = self.state();
        state.ensure_online("upload")?;
        let key = (bucket.to_string(), path.to_string());
        if !upsert && state.objects.contains_key(&key) {
            return Err(anyhow!("The resource already exists: {}/{}", bucket, path));
        }
        state.objects.insert(key, (bytes, content_type.to_string()));
        Ok(format!("memory://{}/{}", bucket, path))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("remove")?;
        for path in paths {
            state.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRemote for MemoryBackend {
    async fn update_last_seen(&self) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("update_last_seen")?;
        state.last_seen_updates += 1;
        Ok(())
    }

    async fn update_avatar_url(&self, user_id: &str, url: Option<&str>) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("update_avatar_url")?;
        state
            .avatars
            .insert(user_id.to_string(), url.map(|u| u.to_string()));
        if let Some(profile) = state.profiles.iter_mut().find(|p| p.id == user_id) {
            profile.avatar_url = url.map(|u| u.to_string());
        }
        Ok(())
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        let state = self.state();
        state.ensure_online("fetch_profiles")?;
        Ok(state
            .profiles
            .iter()
            .filter(|p| user_ids.contains(&p.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FriendRemote for MemoryBackend {
    async fn send_request(&self, sender_id: &str, receiver_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("send_request")?;
        let duplicate = state.friend_requests.iter().any(|r| {
            r.sender_id == sender_id && r.receiver_id == receiver_id && r.status == RequestStatus::Pending
        });
        if duplicate {
            return Err(anyhow!(
                "duplicate key value violates unique constraint (sender_id, receiver_id) = ({}, {})",
                sender_id,
                receiver_id
            ));
        }
        state.friend_requests.push(FriendRequest {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            status: RequestStatus::Pending,
            created_at: Some(Utc::now()),
            sender: None,
        });
        state.notify_sidebar(receiver_id, SidebarChange::FriendRequests);
        Ok(())
    }

    async fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let state = self.state();
        state.ensure_online("pending_requests")?;
        Ok(state
            .friend_requests
            .iter()
            .filter(|r| r.receiver_id == user_id && r.status == RequestStatus::Pending)
            .map(|r| FriendRequest {
                sender: Some(state.profile_or_bare(&r.sender_id)),
                ..r.clone()
            })
            .collect())
    }

    async fn pending_sent(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state();
        state.ensure_online("pending_sent")?;
        Ok(state
            .friend_requests
            .iter()
            .filter(|r| r.sender_id == user_id && r.status == RequestStatus::Pending)
            .map(|r| r.receiver_id.clone())
            .collect())
    }

    async fn respond(&self, request_id: &str, answer: RequestResponse) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("respond")?;
        let Some(request) = state.friend_requests.iter_mut().find(|r| r.id == request_id) else {
            return Ok(());
        };
        request.status = RequestStatus::from(answer);
        let (sender, receiver) = (request.sender_id.clone(), request.receiver_id.clone());

        state.notify_sidebar(&receiver, SidebarChange::FriendRequests);
        if answer == RequestResponse::Accepted {
            state.befriend(&sender, &receiver);
            state.befriend(&receiver, &sender);
            state.notify_sidebar(&sender, SidebarChange::Friendships);
            state.notify_sidebar(&receiver, SidebarChange::Friendships);
        }
        Ok(())
    }

    async fn friends(&self, user_id: &str) -> Result<Vec<Profile>> {
        let state = self.state();
        state.ensure_online("friends")?;
        Ok(state
            .friendships
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, friend)| state.profile_or_bare(friend))
            .collect())
    }

    async fn search_profiles(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<Profile>> {
        let state = self.state();
        state.ensure_online("search_profiles")?;
        let needle = query.to_lowercase();
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&needle))
        };
        Ok(state
            .profiles
            .iter()
            .filter(|p| p.id != user_id && (matches(&p.username) || matches(&p.display_name)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn is_blocked(&self, user_id: &str, target_id: &str) -> Result<bool> {
        let state = self.state();
        state.ensure_online("is_blocked")?;
        Ok(state.blocks.iter().any(|b| {
            (b.blocker_id == user_id && b.blocked_id == target_id)
                || (b.blocker_id == target_id && b.blocked_id == user_id)
        }))
    }

    async fn block(&self, user_id: &str, target_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("block")?;
        let record = BlockRecord {
            blocker_id: user_id.to_string(),
            blocked_id: target_id.to_string(),
        };
        if !state.blocks.contains(&record) {
            state.blocks.push(record);
        }
        Ok(())
    }

    async fn unblock(&self, user_id: &str, target_id: &str) -> Result<()> {
        let mut state = self.state();
        state.ensure_online("unblock")?;
        state
            .blocks
            .retain(|b| !(b.blocker_id == user_id && b.blocked_id == target_id));
        Ok(())
    }
}
