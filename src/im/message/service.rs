//! 会话视图控制器
//!
//! `ChatSession` 是一个打开的会话的唯一所有者：本地消息存储、消息变更订阅、
//! presence 频道、输入状态上报与过期清理都随会话创建，随会话关闭一起释放。
//!
//! 打开顺序：先订阅（事件在通道中缓冲），再拉取历史，最后开始消费缓冲事件。
//! 拉取期间到达的消息可能同时出现在两边，由存储按 ID 去重。

use crate::im::error::ValidationError;
use crate::im::message::listener::{notification_preview, MessageListener};
use crate::im::message::models::{Message, MessageChange, MessageEdit, NewMessage};
use crate::im::message::reactions::{self, ReactionSummary};
use crate::im::message::receipts;
use crate::im::message::store::{lock_store, MessageStore, SharedStore};
use crate::im::message::sweeper::ExpirySweeper;
use crate::im::presence::{typing_peers, PresencePayload, TypingReporter, TypingUser};
use crate::im::remote::{ChannelHandle, PresenceChannel, Remotes};
use crate::im::storage::{upload_attachment, Attachment, UploadKind};
use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 打开会话所需的上下文
#[derive(Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub username: String,
    pub remotes: Remotes,
    pub listener: Arc<dyn MessageListener>,
    pub sweep_interval: Duration,
    pub typing_debounce: Duration,
}

/// 会话级选项
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// 通知标题（会话名或对方名字）
    pub title: Option<String>,
    /// 新消息默认的阅后即焚时长（分钟）
    pub vanish_minutes: Option<i64>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct ChatSession {
    conversation_id: String,
    ctx: SessionContext,
    store: SharedStore,
    message_channel: Option<Arc<dyn ChannelHandle>>,
    presence_channel: Option<Arc<dyn PresenceChannel>>,
    typing: Option<TypingReporter>,
    peers: Arc<Mutex<Vec<TypingUser>>>,
    vanish_minutes: Mutex<Option<i64>>,
    sweeper: ExpirySweeper,
    pumps: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ChatSession {
    /// 打开会话
    ///
    /// 远程调用失败只记录日志并通知监听器，会话仍然可用（保持已有的本地状态）。
    pub async fn open(ctx: SessionContext, conversation_id: &str, options: SessionOptions) -> Self {
        info!("[ChatSession] 📂 打开会话 {}", conversation_id);
        let listener = ctx.listener.clone();
        let store: SharedStore = Arc::new(Mutex::new(MessageStore::new()));

        // 1. 订阅变更，之后到达的事件在通道中缓冲
        let message_feed = match ctx.remotes.realtime.subscribe_messages(conversation_id).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                error!("[ChatSession] ❌ 订阅消息变更失败: {}", e);
                listener
                    .on_session_error("subscribe_messages".to_string(), e.to_string())
                    .await;
                None
            }
        };
        let presence_feed = match ctx.remotes.realtime.join_presence(conversation_id).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                error!("[ChatSession] ❌ 加入 presence 频道失败: {}", e);
                listener
                    .on_session_error("join_presence".to_string(), e.to_string())
                    .await;
                None
            }
        };

        // 2. 拉取历史消息
        match ctx.remotes.messages.fetch_messages(conversation_id).await {
            Ok(messages) => lock_store(&store).load_initial(messages, Utc::now()),
            Err(e) => {
                error!("[ChatSession] ❌ 拉取消息失败: {}", e);
                listener
                    .on_session_error("fetch_messages".to_string(), e.to_string())
                    .await;
            }
        }

        // 3. 开始消费缓冲的变更
        let mut pumps = Vec::new();
        let mut message_channel = None;
        if let Some(feed) = message_feed {
            message_channel = Some(feed.handle);
            pumps.push(tokio::spawn(pump_message_changes(
                feed.events,
                store.clone(),
                listener.clone(),
                ctx.user_id.clone(),
                options.title.clone().unwrap_or_else(|| "New message".to_string()),
            )));
        }

        let peers = Arc::new(Mutex::new(Vec::new()));
        let mut presence_channel = None;
        let mut typing = None;
        if let Some(feed) = presence_feed {
            let reporter = TypingReporter::new(
                feed.channel.clone(),
                &ctx.user_id,
                &ctx.username,
                ctx.typing_debounce,
            );
            if let Err(e) = reporter.announce().await {
                warn!("[ChatSession] 发布初始 presence 失败: {}", e);
            }
            pumps.push(tokio::spawn(pump_presence(
                feed.snapshots,
                peers.clone(),
                listener.clone(),
                ctx.user_id.clone(),
            )));
            presence_channel = Some(feed.channel);
            typing = Some(reporter);
        }

        let sweeper = ExpirySweeper::spawn(store.clone(), ctx.sweep_interval, listener);

        Self {
            conversation_id: conversation_id.to_string(),
            ctx,
            store,
            message_channel,
            presence_channel,
            typing,
            peers,
            vanish_minutes: Mutex::new(options.vanish_minutes),
            sweeper,
            pumps,
            closed: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// 当前消息列表（按到达顺序）
    pub fn messages(&self) -> Vec<Message> {
        lock_store(&self.store).messages()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        lock_store(&self.store).get(id).cloned()
    }

    /// 被引用回复的消息（若仍在本地）
    pub fn reply_target(&self, msg: &Message) -> Option<Message> {
        lock_store(&self.store).reply_target(msg).cloned()
    }

    pub fn typing_peers(&self) -> Vec<TypingUser> {
        lock(&self.peers).clone()
    }

    pub fn vanish_minutes(&self) -> Option<i64> {
        *lock(&self.vanish_minutes)
    }

    /// 设置之后发送的消息的阅后即焚时长，None 表示永久
    pub fn set_vanish_minutes(&self, minutes: Option<i64>) {
        *lock(&self.vanish_minutes) = minutes.filter(|m| *m > 0);
    }

    /// 输入框内容变化
    pub async fn on_input(&self, text: &str) -> Result<()> {
        match &self.typing {
            Some(reporter) => reporter.on_input(text).await,
            None => Ok(()),
        }
    }

    /// 发送文本消息
    pub async fn send_text(&self, text: &str, reply_to: Option<String>) -> Result<Message> {
        let msg = NewMessage::text(&self.conversation_id, &self.ctx.user_id, text)
            .reply_to(reply_to)
            .vanish_after(self.vanish_minutes(), Utc::now());
        msg.validate()?;
        self.clear_typing().await;
        self.submit(msg).await
    }

    /// 发送文件（chat-files，任意类型）
    pub async fn send_file(&self, attachment: Attachment) -> Result<Message> {
        self.send_attachment(UploadKind::File, attachment).await
    }

    /// 发送图片（chat-images）
    pub async fn send_image(&self, attachment: Attachment) -> Result<Message> {
        self.send_attachment(UploadKind::Image, attachment).await
    }

    /// 发送语音（voice-messages，webm）
    pub async fn send_voice(&self, bytes: Vec<u8>, duration_secs: i32) -> Result<Message> {
        let url = self
            .upload(UploadKind::Voice, Attachment::voice(bytes))
            .await?;
        let msg = NewMessage::audio(&self.conversation_id, &self.ctx.user_id, url, duration_secs)
            .vanish_after(self.vanish_minutes(), Utc::now());
        self.submit(msg).await
    }

    async fn send_attachment(&self, kind: UploadKind, attachment: Attachment) -> Result<Message> {
        let name = attachment.file_name.clone();
        let mime = attachment.mime_type.clone();
        let url = self.upload(kind, attachment).await?;
        let msg = NewMessage::file(&self.conversation_id, &self.ctx.user_id, url, &name, &mime)
            .vanish_after(self.vanish_minutes(), Utc::now());
        self.submit(msg).await
    }

    async fn upload(&self, kind: UploadKind, attachment: Attachment) -> Result<String> {
        let result = upload_attachment(
            self.ctx.remotes.storage.as_ref(),
            kind,
            &self.ctx.user_id,
            &self.conversation_id,
            attachment,
        )
        .await;
        if let Err(e) = &result {
            if e.downcast_ref::<ValidationError>().is_none() {
                self.report_error("upload", e).await;
            }
        }
        result
    }

    /// 写入远端并合并到本地；随后的推送回显按 ID 去重
    async fn submit(&self, msg: NewMessage) -> Result<Message> {
        let sent = match self.ctx.remotes.messages.send_message(&msg).await {
            Ok(sent) => sent,
            Err(e) => {
                self.report_error("send_message", &e).await;
                return Err(e);
            }
        };
        debug!("[ChatSession] ✉️ 已发送消息 {}", sent.id);

        let inserted = lock_store(&self.store).insert(sent.clone());
        if inserted {
            self.ctx.listener.on_message_added(sent.clone()).await;
        }
        Ok(sent)
    }

    /// 编辑自己的消息（发送后 15 分钟内）
    pub async fn edit(&self, message_id: &str, content: &str) -> Result<Message> {
        let now = Utc::now();
        let original = self.owned_message(message_id)?;
        if !original.can_edit(now) {
            return Err(ValidationError::EditWindowElapsed.into());
        }
        let edit = MessageEdit::for_message(&original, content, now)?;

        if let Err(e) = self
            .ctx
            .remotes
            .messages
            .edit_message(message_id, &self.ctx.user_id, &edit)
            .await
        {
            self.report_error("edit_message", &e).await;
            return Err(e);
        }

        let updated = {
            let mut store = lock_store(&self.store);
            store.get_mut(message_id).map(|msg| {
                edit.apply_to(msg);
                msg.clone()
            })
        };
        match updated {
            Some(msg) => {
                self.ctx.listener.on_message_updated(msg.clone()).await;
                Ok(msg)
            }
            // 编辑期间消息已过期被清理
            None => {
                let mut msg = original;
                edit.apply_to(&mut msg);
                Ok(msg)
            }
        }
    }

    /// 删除自己的消息
    pub async fn delete(&self, message_id: &str) -> Result<()> {
        self.owned_message(message_id)?;

        if let Err(e) = self
            .ctx
            .remotes
            .messages
            .delete_message(message_id, &self.ctx.user_id)
            .await
        {
            self.report_error("delete_message", &e).await;
            return Err(e);
        }

        if lock_store(&self.store).remove(message_id) {
            self.ctx
                .listener
                .on_message_removed(message_id.to_string())
                .await;
        }
        Ok(())
    }

    fn owned_message(&self, message_id: &str) -> Result<Message, ValidationError> {
        let msg = lock_store(&self.store)
            .get(message_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownMessage(message_id.to_string()))?;
        if msg.sender_id != self.ctx.user_id {
            return Err(ValidationError::NotMessageOwner);
        }
        Ok(msg)
    }

    /// 对消息添加/取消表情回应
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<Vec<ReactionSummary>> {
        reactions::toggle_reaction(
            self.ctx.remotes.reactions.as_ref(),
            message_id,
            &self.ctx.user_id,
            emoji,
        )
        .await
    }

    /// 将本地所有他人发送的消息标记为已读
    pub async fn mark_visible_read(&self) -> Result<()> {
        let ids = self.incoming_ids();
        receipts::mark_read(self.ctx.remotes.receipts.as_ref(), &self.ctx.user_id, &ids).await
    }

    /// 本地他人消息中未读的数量
    pub async fn unread_count(&self) -> Result<usize> {
        let ids = self.incoming_ids();
        receipts::unread_count(self.ctx.remotes.receipts.as_ref(), &self.ctx.user_id, &ids).await
    }

    fn incoming_ids(&self) -> Vec<String> {
        lock_store(&self.store)
            .messages()
            .into_iter()
            .filter(|m| m.sender_id != self.ctx.user_id)
            .map(|m| m.id)
            .collect()
    }

    async fn clear_typing(&self) {
        if let Some(reporter) = &self.typing {
            if let Err(e) = reporter.clear().await {
                warn!("[ChatSession] 清除输入状态失败: {}", e);
            }
        }
    }

    async fn report_error(&self, operation: &str, e: &anyhow::Error) {
        error!("[ChatSession] ❌ {} 失败: {}", operation, e);
        self.ctx
            .listener
            .on_session_error(operation.to_string(), e.to_string())
            .await;
    }

    /// 关闭会话：退订两个频道，停止定时器与后台任务
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(reporter) = self.typing.take() {
            reporter.shutdown();
        }
        self.sweeper.stop();
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        if let Some(handle) = self.message_channel.take() {
            if let Err(e) = handle.unsubscribe().await {
                warn!("[ChatSession] 退订 {} 失败: {}", handle.topic(), e);
            }
        }
        if let Some(channel) = self.presence_channel.take() {
            if let Err(e) = channel.unsubscribe().await {
                warn!("[ChatSession] 退订 {} 失败: {}", channel.topic(), e);
            }
        }
        info!("[ChatSession] 📕 已关闭会话 {}", self.conversation_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
        if self.closed {
            return;
        }
        // 未显式关闭时在后台退订
        let message_channel = self.message_channel.take();
        let presence_channel = self.presence_channel.take();
        if message_channel.is_none() && presence_channel.is_none() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(channel) = message_channel {
                    let _ = channel.unsubscribe().await;
                }
                if let Some(channel) = presence_channel {
                    let _ = channel.unsubscribe().await;
                }
            });
        }
    }
}

/// 按到达顺序把远端变更应用到本地存储
async fn pump_message_changes(
    mut events: mpsc::UnboundedReceiver<MessageChange>,
    store: SharedStore,
    listener: Arc<dyn MessageListener>,
    me: String,
    title: String,
) {
    while let Some(change) = events.recv().await {
        match change {
            MessageChange::Insert(msg) => {
                if msg.is_expired(Utc::now()) {
                    debug!("[ChatSession] 丢弃已过期的推送消息 {}", msg.id);
                    continue;
                }
                let inserted = lock_store(&store).insert(msg.clone());
                if !inserted {
                    continue;
                }
                if msg.sender_id != me {
                    listener
                        .on_new_message_notification(title.clone(), notification_preview(&msg.content))
                        .await;
                }
                listener.on_message_added(msg).await;
            }
            MessageChange::Update(msg) => {
                let updated = lock_store(&store).update(msg.clone());
                if updated {
                    listener.on_message_updated(msg).await;
                }
            }
            MessageChange::Delete { id } => {
                let removed = lock_store(&store).remove(&id);
                if removed {
                    listener.on_message_removed(id).await;
                }
            }
        }
    }
    debug!("[ChatSession] 消息变更通道已关闭");
}

/// presence 快照 -> 正在输入的对端
async fn pump_presence(
    mut snapshots: mpsc::UnboundedReceiver<Vec<PresencePayload>>,
    peers: Arc<Mutex<Vec<TypingUser>>>,
    listener: Arc<dyn MessageListener>,
    me: String,
) {
    while let Some(snapshot) = snapshots.recv().await {
        let typing = typing_peers(&snapshot, &me);
        let changed = {
            let mut current = lock(&peers);
            if *current == typing {
                false
            } else {
                *current = typing.clone();
                true
            }
        };
        if changed {
            listener.on_typing_changed(typing).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::message::listener::MessageListener;
    use crate::im::remote::{MemoryBackend, MessageRemote, RealtimeRemote};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            lock(&self.events).clone()
        }

        fn push(&self, event: String) {
            lock(&self.events).push(event);
        }
    }

    #[async_trait]
    impl MessageListener for RecordingListener {
        async fn on_message_added(&self, message: Message) {
            self.push(format!("added:{}", message.content));
        }
        async fn on_message_updated(&self, message: Message) {
            self.push(format!("updated:{}", message.content));
        }
        async fn on_message_removed(&self, message_id: String) {
            self.push(format!("removed:{}", message_id));
        }
        async fn on_messages_expired(&self, message_ids: Vec<String>) {
            self.push(format!("expired:{}", message_ids.join(",")));
        }
        async fn on_typing_changed(&self, typing_users: Vec<TypingUser>) {
            let names: Vec<String> = typing_users.into_iter().map(|u| u.username).collect();
            self.push(format!("typing:{}", names.join(",")));
        }
        async fn on_new_message_notification(&self, title: String, preview: String) {
            self.push(format!("notify:{}:{}", title, preview));
        }
        async fn on_session_error(&self, operation: String, _error: String) {
            self.push(format!("error:{}", operation));
        }
    }

    fn context(backend: &MemoryBackend, user: &str, listener: Arc<RecordingListener>) -> SessionContext {
        SessionContext {
            user_id: user.to_string(),
            username: user.to_string(),
            remotes: Remotes::memory(backend),
            listener,
            sweep_interval: Duration::from_millis(20),
            typing_debounce: Duration::from_millis(2000),
        }
    }

    async fn open(backend: &MemoryBackend, user: &str) -> (ChatSession, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let session = ChatSession::open(
            context(backend, user, listener.clone()),
            "chat-1",
            SessionOptions {
                title: Some("Team".to_string()),
                vanish_minutes: None,
            },
        )
        .await;
        (session, listener)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn existing(id: &str, sender: &str, content: &str) -> Message {
        let mut msg = crate::im::message::models::sample_message(id, Utc::now());
        msg.sender_id = sender.to_string();
        msg.content = content.to_string();
        msg
    }

    #[tokio::test]
    async fn initial_load_skips_expired_messages() {
        let backend = MemoryBackend::new();
        backend.seed_message(existing("m1", "bob", "still here"));
        let mut gone = existing("m2", "bob", "gone");
        gone.vanish_at = Some(Utc::now() - ChronoDuration::seconds(1));
        backend.seed_message(gone);

        let (session, listener) = open(&backend, "alice").await;
        let ids: Vec<String> = session.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1"]);
        // 初始加载不触发 added
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn own_send_is_merged_once() {
        let backend = MemoryBackend::new();
        let (session, listener) = open(&backend, "alice").await;

        let sent = session.send_text("  hello  ", None).await.unwrap();
        assert_eq!(sent.content, "hello");
        settle().await;

        assert_eq!(session.messages().len(), 1);
        assert_eq!(listener.events(), vec!["added:hello"]);
    }

    #[tokio::test]
    async fn remote_insert_notifies_for_other_senders() {
        let backend = MemoryBackend::new();
        let (session, listener) = open(&backend, "alice").await;

        backend
            .send_message(&NewMessage::text("chat-1", "bob", "hey alice"))
            .await
            .unwrap();
        settle().await;

        assert_eq!(session.messages().len(), 1);
        assert_eq!(
            listener.events(),
            vec!["notify:Team:hey alice", "added:hey alice"]
        );
    }

    struct RacingMessages {
        backend: MemoryBackend,
    }

    #[async_trait]
    impl MessageRemote for RacingMessages {
        async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
            // 拉取期间另一端发来一条消息：既进入订阅缓冲，也出现在拉取结果里
            self.backend
                .send_message(&NewMessage::text(conversation_id, "bob", "during fetch"))
                .await?;
            self.backend.fetch_messages(conversation_id).await
        }
        async fn send_message(&self, msg: &NewMessage) -> Result<Message> {
            self.backend.send_message(msg).await
        }
        async fn edit_message(&self, id: &str, sender: &str, edit: &MessageEdit) -> Result<()> {
            self.backend.edit_message(id, sender, edit).await
        }
        async fn delete_message(&self, id: &str, sender: &str) -> Result<()> {
            self.backend.delete_message(id, sender).await
        }
    }

    #[tokio::test]
    async fn change_during_fetch_is_not_duplicated() {
        let backend = MemoryBackend::new();
        let listener = Arc::new(RecordingListener::default());
        let mut ctx = context(&backend, "alice", listener.clone());
        ctx.remotes.messages = Arc::new(RacingMessages {
            backend: backend.clone(),
        });

        let session = ChatSession::open(ctx, "chat-1", SessionOptions::default()).await;
        settle().await;

        assert_eq!(session.messages().len(), 1);
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_session_usable() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let (session, listener) = open(&backend, "alice").await;

        assert!(session.messages().is_empty());
        assert!(listener.events().contains(&"error:fetch_messages".to_string()));

        backend.set_offline(false);
        session.send_text("back online", None).await.unwrap();
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn empty_text_never_reaches_backend() {
        let backend = MemoryBackend::new();
        let (session, _listener) = open(&backend, "alice").await;

        let err = session.send_text("   ", None).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::EmptyMessage)
        );
        assert!(backend.stored_messages("chat-1").is_empty());
    }

    #[tokio::test]
    async fn vanish_minutes_apply_to_new_messages() {
        let backend = MemoryBackend::new();
        let (session, _listener) = open(&backend, "alice").await;

        session.set_vanish_minutes(Some(5));
        let sent = session.send_text("secret", None).await.unwrap();
        let vanish_at = sent.vanish_at.unwrap();
        let remaining = vanish_at - Utc::now();
        assert!(remaining > ChronoDuration::minutes(4));
        assert!(remaining <= ChronoDuration::minutes(5));

        session.set_vanish_minutes(None);
        assert!(session.send_text("forever", None).await.unwrap().vanish_at.is_none());
    }

    #[tokio::test]
    async fn edit_checks_owner_and_updates_locally() {
        let backend = MemoryBackend::new();
        backend.seed_message(existing("theirs", "bob", "bob's"));
        let (session, listener) = open(&backend, "alice").await;

        let mine = session.send_text("tpyo", None).await.unwrap();
        let edited = session.edit(&mine.id, "typo").await.unwrap();
        assert_eq!(edited.content, "typo");
        assert_eq!(edited.original_content.as_deref(), Some("tpyo"));
        assert!(edited.is_edited());
        settle().await;
        assert_eq!(session.message(&mine.id).unwrap().content, "typo");
        assert!(listener.events().contains(&"updated:typo".to_string()));

        let err = session.edit("theirs", "hijack").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::NotMessageOwner)
        );
        assert!(session.edit("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn edit_window_is_enforced() {
        let backend = MemoryBackend::new();
        let mut old = existing("old", "alice", "ancient");
        old.created_at = Utc::now() - ChronoDuration::minutes(16);
        backend.seed_message(old);
        let (session, _listener) = open(&backend, "alice").await;

        let err = session.edit("old", "new").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::EditWindowElapsed)
        );
        assert_eq!(backend.stored_messages("chat-1")[0].content, "ancient");
    }

    #[tokio::test]
    async fn delete_removes_own_message_only() {
        let backend = MemoryBackend::new();
        backend.seed_message(existing("theirs", "bob", "bob's"));
        let (session, listener) = open(&backend, "alice").await;

        let mine = session.send_text("oops", None).await.unwrap();
        session.delete(&mine.id).await.unwrap();
        settle().await;
        assert!(session.message(&mine.id).is_none());
        let removed: Vec<String> = listener
            .events()
            .into_iter()
            .filter(|e| e.starts_with("removed:"))
            .collect();
        assert_eq!(removed.len(), 1);

        assert!(session.delete("theirs").await.is_err());
        assert_eq!(backend.stored_messages("chat-1").len(), 1);
    }

    #[tokio::test]
    async fn remote_delete_of_unknown_message_is_ignored() {
        let backend = MemoryBackend::new();
        let (session, listener) = open(&backend, "alice").await;

        backend.emit("chat-1", MessageChange::Delete { id: "ghost".into() });
        backend.emit("chat-1", MessageChange::Update(existing("ghost", "bob", "boo")));
        settle().await;

        assert!(session.messages().is_empty());
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn sweeper_expires_local_messages() {
        let backend = MemoryBackend::new();
        let mut short = existing("short", "bob", "blink");
        short.vanish_at = Some(Utc::now() + ChronoDuration::milliseconds(80));
        backend.seed_message(short);
        let (session, listener) = open(&backend, "alice").await;
        assert_eq!(session.messages().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(session.messages().is_empty());
        assert!(listener.events().contains(&"expired:short".to_string()));
    }

    #[tokio::test]
    async fn typing_peers_come_from_presence() {
        let backend = MemoryBackend::new();
        let (session, listener) = open(&backend, "alice").await;

        let bob_feed = backend.join_presence("chat-1").await.unwrap();
        bob_feed
            .channel
            .track(&PresencePayload {
                user_id: "bob".into(),
                username: "bob".into(),
                is_typing: true,
            })
            .await
            .unwrap();
        settle().await;

        let peers = session.typing_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "bob");
        assert!(listener.events().contains(&"typing:bob".to_string()));

        // 自己的输入状态不会出现在列表中
        session.on_input("hi").await.unwrap();
        settle().await;
        assert_eq!(session.typing_peers().len(), 1);
    }

    #[tokio::test]
    async fn close_releases_subscriptions() {
        let backend = MemoryBackend::new();
        let (mut session, listener) = open(&backend, "alice").await;
        assert_eq!(backend.message_subscriber_count("chat-1"), 1);
        assert_eq!(backend.presence_members("chat-1").len(), 1);

        session.close().await;
        assert!(session.is_closed());
        assert_eq!(backend.message_subscriber_count("chat-1"), 0);
        assert!(backend.presence_members("chat-1").is_empty());

        backend
            .send_message(&NewMessage::text("chat-1", "bob", "anyone?"))
            .await
            .unwrap();
        settle().await;
        assert!(session.messages().is_empty());
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn dropped_session_unsubscribes_in_background() {
        let backend = MemoryBackend::new();
        let (session, _listener) = open(&backend, "alice").await;
        drop(session);
        settle().await;
        assert_eq!(backend.message_subscriber_count("chat-1"), 0);
    }

    #[tokio::test]
    async fn reopened_chat_survives_deferred_unsubscribe_of_dropped_session() {
        let backend = MemoryBackend::new();
        let (old, _old_listener) = open(&backend, "alice").await;
        drop(old);
        // 新会话在旧会话的后台退订执行前就已订阅
        let (session, listener) = open(&backend, "alice").await;
        settle().await;
        assert_eq!(backend.message_subscriber_count("chat-1"), 1);

        backend
            .send_message(&NewMessage::text("chat-1", "bob", "still listening"))
            .await
            .unwrap();
        settle().await;
        assert_eq!(session.messages().len(), 1);
        assert!(listener.events().contains(&"added:still listening".to_string()));
    }

    #[tokio::test]
    async fn voice_and_file_messages_upload_first() {
        let backend = MemoryBackend::new();
        let (session, _listener) = open(&backend, "alice").await;

        let voice = session.send_voice(vec![1, 2, 3], 4).await.unwrap();
        assert_eq!(voice.content, "🎤 Voice message");
        assert_eq!(voice.audio_duration, Some(4));
        assert!(voice.audio_url.unwrap().starts_with("memory://voice-messages/alice/"));

        let file = session
            .send_file(Attachment::new("notes.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap();
        assert_eq!(file.content, "📎 notes.txt");
        assert_eq!(file.file_type.as_deref(), Some("text/plain"));

        let err = session
            .send_image(Attachment::new("notes.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
        assert_eq!(backend.stored_messages("chat-1").len(), 2);
    }

    #[tokio::test]
    async fn reactions_and_receipts_through_session() {
        let backend = MemoryBackend::new();
        backend.seed_message(existing("m1", "bob", "hi"));
        backend.seed_message(existing("m2", "bob", "there"));
        let (session, _listener) = open(&backend, "alice").await;

        assert_eq!(session.unread_count().await.unwrap(), 2);
        session.mark_visible_read().await.unwrap();
        assert_eq!(session.unread_count().await.unwrap(), 0);

        let summary = session.toggle_reaction("m1", "❤️").await.unwrap();
        assert_eq!(summary.len(), 1);
        assert!(summary[0].has_reacted);
    }
}
