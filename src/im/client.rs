//! Vanish 客户端核心实现模块
//!
//! `VanishClient` 持有一组远程服务实现与当前打开的会话。同一时刻最多只有一个
//! `ChatSession`：打开新会话前先关闭旧会话，避免订阅重叠。

use crate::im::auth::AuthSession;
use crate::im::conversation::{ChatSettings, Conversation, ConversationApi, ConversationResolver};
use crate::im::friend::{FriendApi, FriendService};
use crate::im::message::listener::{EmptyMessageListener, MessageListener};
use crate::im::message::service::{ChatSession, SessionContext, SessionOptions};
use crate::im::message::sweeper::SWEEP_INTERVAL;
use crate::im::message::MessageApi;
use crate::im::presence::{
    username_from_email, LastSeenTracker, ProfileApi, LAST_SEEN_INTERVAL, TYPING_DEBOUNCE,
};
use crate::im::realtime::{RealtimeClient, HEARTBEAT_INTERVAL};
use crate::im::remote::Remotes;
use crate::im::sidebar::{SidebarListener, SidebarWatcher};
use crate::im::storage::{remove_avatar, upload_avatar, Attachment, StorageApi};
use crate::im::types::RestClient;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 平台地址的环境变量
pub const ENV_SUPABASE_URL: &str = "VANISH_SUPABASE_URL";
/// 匿名 key 的环境变量
pub const ENV_SUPABASE_ANON_KEY: &str = "VANISH_SUPABASE_ANON_KEY";

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 登录邮箱（用于推导 presence 中的用户名）
    pub email: Option<String>,
    /// 认证 token
    pub access_token: String,
    /// 平台基础地址，例如 `https://xyz.supabase.co`
    pub supabase_url: String,
    /// 平台匿名 key
    pub anon_key: String,
    /// 过期消息清理间隔
    pub sweep_interval: Duration,
    /// 输入状态的防抖时长
    pub typing_debounce: Duration,
    /// last_seen 上报间隔
    pub last_seen_interval: Duration,
    /// 实时连接心跳间隔
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    /// 创建默认配置（尚未登录）
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        Self {
            user_id: String::new(),
            email: None,
            access_token: String::new(),
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            sweep_interval: SWEEP_INTERVAL,
            typing_debounce: TYPING_DEBOUNCE,
            last_seen_interval: LAST_SEEN_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// 从环境变量读取平台地址与匿名 key
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(ENV_SUPABASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("缺少环境变量 {}", ENV_SUPABASE_URL))?;
        let key = lookup(ENV_SUPABASE_ANON_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("缺少环境变量 {}", ENV_SUPABASE_ANON_KEY))?;
        Ok(Self::new(&url, &key))
    }

    /// 写入登录结果
    pub fn with_session(mut self, session: &AuthSession) -> Self {
        self.user_id = session.user.id.clone();
        self.email = session.user.email.clone();
        self.access_token = session.access_token.clone();
        self
    }

    /// 实时服务的 WebSocket 地址
    pub fn realtime_url(&self) -> String {
        let base = if let Some(rest) = self.supabase_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.supabase_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.supabase_url.clone()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base, self.anon_key
        )
    }

    /// presence 中展示的用户名（邮箱 @ 之前的部分）
    pub fn username(&self) -> String {
        username_from_email(self.email.as_deref())
    }
}

/// Vanish 客户端
pub struct VanishClient {
    config: ClientConfig,
    remotes: Remotes,
    resolver: ConversationResolver,
    friends: FriendService,
    profiles: Option<ProfileApi>,
    realtime: Option<Arc<RealtimeClient>>,
    listener: Arc<dyn MessageListener>,
    session: Option<ChatSession>,
    last_seen: Option<LastSeenTracker>,
    sidebar: Option<SidebarWatcher>,
}

impl VanishClient {
    /// 连接真实平台：构建 REST 客户端与实时连接
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        if config.user_id.is_empty() || config.access_token.is_empty() {
            return Err(anyhow!("未登录：缺少 user_id 或 access_token"));
        }
        info!("[Client] 🔗 连接到平台 (user={})", config.user_id);

        let rest = RestClient::new(&config.supabase_url, &config.anon_key, &config.access_token)?;
        let realtime = Arc::new(
            RealtimeClient::connect(
                &config.realtime_url(),
                &config.access_token,
                config.heartbeat_interval,
            )
            .await
            .context("连接实时服务失败")?,
        );

        let messages = Arc::new(MessageApi::new(rest.clone()));
        let profiles = Arc::new(ProfileApi::new(rest.clone()));
        let remotes = Remotes {
            messages: messages.clone(),
            reactions: messages.clone(),
            receipts: messages,
            conversations: Arc::new(ConversationApi::new(rest.clone())),
            realtime: realtime.clone(),
            storage: Arc::new(StorageApi::new(rest.clone())),
            profiles,
            friends: Arc::new(FriendApi::new(rest.clone())),
        };

        let mut client = Self::with_remotes(config, remotes);
        client.profiles = Some(ProfileApi::new(rest));
        client.realtime = Some(realtime);
        info!("[Client] ✅ 连接成功");
        Ok(client)
    }

    /// 使用给定的远程服务实现（例如进程内后端）
    pub fn with_remotes(config: ClientConfig, remotes: Remotes) -> Self {
        Self {
            resolver: ConversationResolver::new(remotes.conversations.clone()),
            friends: FriendService::new(remotes.friends.clone(), &config.user_id),
            config,
            remotes,
            profiles: None,
            realtime: None,
            listener: Arc::new(EmptyMessageListener),
            session: None,
            last_seen: None,
            sidebar: None,
        }
    }

    /// 注册消息监听器（对之后打开的会话生效）
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.listener = listener;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    /// 好友请求、好友列表、搜索与拉黑
    pub fn friends(&self) -> &FriendService {
        &self.friends
    }

    /// 用户资料 API（仅连接真实平台时可用）
    pub fn profiles(&self) -> Result<&ProfileApi> {
        self.profiles.as_ref().ok_or_else(|| anyhow!("用户资料服务不可用"))
    }

    /// 当前打开的会话
    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            user_id: self.config.user_id.clone(),
            username: self.config.username(),
            remotes: self.remotes.clone(),
            listener: self.listener.clone(),
            sweep_interval: self.config.sweep_interval,
            typing_debounce: self.config.typing_debounce,
        }
    }

    /// 打开会话；已有会话时先关闭
    pub async fn open_conversation(&mut self, conversation_id: &str) -> Result<&ChatSession> {
        self.close_conversation().await;

        let options = match self.resolver.get_conversation(conversation_id).await {
            Ok(conversation) => SessionOptions {
                title: if conversation.is_direct() {
                    self.direct_chat_title(conversation_id).await
                } else {
                    conversation.name.clone()
                },
                vanish_minutes: conversation.default_vanish_minutes(),
            },
            Err(e) => {
                warn!("[Client] 读取会话 {} 设置失败，使用默认值: {}", conversation_id, e);
                SessionOptions::default()
            }
        };

        let session = ChatSession::open(self.session_context(), conversation_id, options).await;
        Ok(&*self.session.insert(session))
    }

    /// 单聊的通知标题：`New message from {对方显示名}`
    async fn direct_chat_title(&self, conversation_id: &str) -> Option<String> {
        let members = match self.remotes.conversations.member_ids(conversation_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("[Client] 读取单聊 {} 成员失败: {}", conversation_id, e);
                return None;
            }
        };
        let peer = members.into_iter().find(|id| *id != self.config.user_id)?;
        match self.remotes.profiles.fetch_profiles(&[peer.clone()]).await {
            Ok(profiles) => profiles
                .into_iter()
                .find(|p| p.id == peer)
                .map(|p| format!("New message from {}", p.display_name())),
            Err(e) => {
                warn!("[Client] 读取用户 {} 资料失败: {}", peer, e);
                None
            }
        }
    }

    /// 与某个用户的单聊（不存在时创建）并打开
    pub async fn open_direct_chat(&mut self, target_user_id: &str) -> Result<&ChatSession> {
        let conversation = self
            .resolver
            .open_direct(&self.config.user_id, target_user_id)
            .await?;
        self.open_conversation(&conversation.id).await
    }

    /// 关闭当前会话
    pub async fn close_conversation(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.resolver.list_conversations(&self.config.user_id).await
    }

    pub async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<Conversation> {
        self.resolver
            .create_group(&self.config.user_id, name, member_ids)
            .await
    }

    pub async fn chat_settings(&self, conversation_id: &str) -> Result<ChatSettings> {
        self.resolver
            .chat_settings(conversation_id, &self.config.user_id)
            .await
    }

    /// 修改会话默认可见时长（仅管理员）；当前打开的会话同步更新默认阅后即焚时长
    pub async fn update_chat_visibility(&self, conversation_id: &str, hours: Option<i64>) -> Result<()> {
        let settings = self.chat_settings(conversation_id).await?;
        if !settings.is_admin {
            return Err(anyhow!("只有管理员可以修改会话设置"));
        }
        self.resolver
            .update_default_vanish(conversation_id, hours)
            .await?;
        if let Some(session) = self
            .session
            .as_ref()
            .filter(|s| s.conversation_id() == conversation_id)
        {
            session.set_vanish_minutes(hours.map(|h| h * 60));
        }
        Ok(())
    }

    /// 上传新头像，返回公开 URL
    pub async fn update_avatar(&self, current_avatar: Option<&str>, attachment: Attachment) -> Result<String> {
        upload_avatar(
            self.remotes.storage.as_ref(),
            self.remotes.profiles.as_ref(),
            &self.config.user_id,
            current_avatar,
            attachment,
        )
        .await
    }

    pub async fn remove_avatar(&self, current_avatar: &str) -> Result<()> {
        remove_avatar(
            self.remotes.storage.as_ref(),
            self.remotes.profiles.as_ref(),
            &self.config.user_id,
            current_avatar,
        )
        .await
    }

    /// 开始监听好友请求、好友关系与会话成员变更；已在监听时先停止旧的订阅
    pub async fn start_sidebar_updates(&mut self, listener: Arc<dyn SidebarListener>) -> Result<()> {
        self.stop_sidebar_updates().await;
        let watcher = SidebarWatcher::start(&self.config.user_id, &self.remotes, listener).await?;
        self.sidebar = Some(watcher);
        Ok(())
    }

    pub async fn stop_sidebar_updates(&mut self) {
        if let Some(mut watcher) = self.sidebar.take() {
            watcher.stop().await;
        }
    }

    /// 开始周期性上报 last_seen
    pub fn start_presence_tracking(&mut self) {
        if self.last_seen.as_ref().is_some_and(|t| t.is_running()) {
            return;
        }
        self.last_seen = Some(LastSeenTracker::start(
            self.remotes.profiles.clone(),
            self.config.last_seen_interval,
        ));
    }

    pub fn stop_presence_tracking(&mut self) {
        if let Some(mut tracker) = self.last_seen.take() {
            tracker.stop();
        }
    }

    /// 应用重新可见时立即上报一次
    pub async fn touch_presence(&self) {
        if let Some(tracker) = &self.last_seen {
            tracker.touch().await;
        }
    }

    /// 关闭会话、停止后台任务并断开实时连接
    pub async fn shutdown(&mut self) {
        self.close_conversation().await;
        self.stop_sidebar_updates().await;
        self.stop_presence_tracking();
        if let Some(realtime) = self.realtime.take() {
            realtime.socket().close().await;
        }
        info!("[Client] 👋 客户端已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::auth::sign_in_with_password;
    use crate::im::conversation::ConversationResolver;
    use crate::im::conversation::Conversation;
    use crate::im::friend::FriendRequest;
    use crate::im::message::Message;
    use crate::im::presence::{Profile, TypingUser};
    use crate::im::remote::MemoryBackend;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};
    use tracing::{error, info};

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            // 测试中默认打开当前 crate 的 debug，关闭底层 HTTP 客户端的 debug 噪音
            let filter_layer =
                EnvFilter::new("info,vanish_sdk_core=debug,hyper_util::client=info,reqwest=info");

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// 只记录通知标题
    #[derive(Default)]
    struct NotificationLog(Mutex<Vec<String>>);

    impl NotificationLog {
        fn titles(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageListener for NotificationLog {
        async fn on_message_added(&self, _message: Message) {}
        async fn on_message_updated(&self, _message: Message) {}
        async fn on_message_removed(&self, _message_id: String) {}
        async fn on_messages_expired(&self, _message_ids: Vec<String>) {}
        async fn on_typing_changed(&self, _typing_users: Vec<TypingUser>) {}
        async fn on_new_message_notification(&self, title: String, _preview: String) {
            self.0.lock().unwrap().push(title);
        }
        async fn on_session_error(&self, _operation: String, _error: String) {}
    }

    /// 把收到的好友请求发送者转发给测试
    struct RequestLog(tokio::sync::mpsc::UnboundedSender<Vec<String>>);

    #[async_trait]
    impl SidebarListener for RequestLog {
        async fn on_friend_requests_changed(&self, requests: Vec<FriendRequest>) {
            let _ = self.0.send(requests.into_iter().map(|r| r.sender_id).collect());
        }
        async fn on_friends_changed(&self, _friends: Vec<Profile>) {}
        async fn on_conversations_changed(&self, _conversations: Vec<Conversation>) {}
    }

    fn config(user: &str) -> ClientConfig {
        let mut config = ClientConfig::new("http://localhost:54321", "anon");
        config.user_id = user.to_string();
        config.email = Some(format!("{}@example.com", user));
        config.access_token = "jwt".to_string();
        config
    }

    #[test]
    fn realtime_url_switches_scheme() {
        let config = ClientConfig::new("https://demo.supabase.co/", "key");
        assert_eq!(
            config.realtime_url(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        let local = ClientConfig::new("http://localhost:54321", "key");
        assert!(local.realtime_url().starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn env_values_are_required() {
        let mut env = HashMap::new();
        env.insert(ENV_SUPABASE_URL, "https://demo.supabase.co".to_string());
        let err = ClientConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_SUPABASE_ANON_KEY));

        env.insert(ENV_SUPABASE_ANON_KEY, "key".to_string());
        let config = ClientConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.anon_key, "key");
        assert_eq!(config.sweep_interval, SWEEP_INTERVAL);
    }

    #[test]
    fn username_comes_from_email() {
        assert_eq!(config("jane").username(), "jane");
    }

    #[tokio::test]
    async fn opening_a_conversation_closes_the_previous_one() {
        let backend = MemoryBackend::new();
        let mut client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));

        client.open_conversation("a").await.unwrap();
        assert_eq!(backend.message_subscriber_count("a"), 1);

        let session = client.open_conversation("b").await.unwrap();
        assert_eq!(session.conversation_id(), "b");
        assert_eq!(backend.message_subscriber_count("a"), 0);
        assert!(backend.presence_members("a").is_empty());
        assert_eq!(backend.message_subscriber_count("b"), 1);

        client.shutdown().await;
        assert_eq!(backend.message_subscriber_count("b"), 0);
        assert!(client.session().is_none());
    }

    #[tokio::test]
    async fn direct_chat_is_reused() {
        let backend = MemoryBackend::new();
        let mut client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));

        let first = client
            .open_direct_chat("bob")
            .await
            .unwrap()
            .conversation_id()
            .to_string();
        let second = client
            .open_direct_chat("bob")
            .await
            .unwrap()
            .conversation_id()
            .to_string();

        assert_eq!(first, second);
        assert_eq!(backend.conversations().len(), 1);
        assert_eq!(backend.members_of(&first).len(), 2);
    }

    #[tokio::test]
    async fn chat_visibility_becomes_session_default() {
        let backend = MemoryBackend::new();
        let mut client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));
        let group = client
            .create_group("Team", &["bob".to_string()])
            .await
            .unwrap();

        client.update_chat_visibility(&group.id, Some(2)).await.unwrap();
        let session = client.open_conversation(&group.id).await.unwrap();
        assert_eq!(session.vanish_minutes(), Some(120));

        client.update_chat_visibility(&group.id, None).await.unwrap();
        assert_eq!(client.session().unwrap().vanish_minutes(), None);

        // 非创建者不是群管理员
        let bob = VanishClient::with_remotes(config("bob"), Remotes::memory(&backend));
        assert!(bob.update_chat_visibility(&group.id, Some(1)).await.is_err());
    }

    #[tokio::test]
    async fn presence_tracking_reports_last_seen() {
        let backend = MemoryBackend::new();
        let mut client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));

        client.start_presence_tracking();
        settle().await;
        assert!(backend.last_seen_updates() >= 1);

        client.stop_presence_tracking();
        let after_stop = backend.last_seen_updates();
        client.touch_presence().await;
        assert_eq!(backend.last_seen_updates(), after_stop);
    }

    #[tokio::test]
    async fn avatar_roundtrip_updates_profile() {
        let backend = MemoryBackend::new();
        let client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));

        let url = client
            .update_avatar(None, Attachment::new("me.png", "image/png", vec![1, 2]))
            .await
            .unwrap();
        assert_eq!(backend.avatar_url("alice").as_deref(), Some(url.as_str()));

        client.remove_avatar(&url).await.unwrap();
        assert!(backend.avatar_url("alice").is_none());
        assert!(backend.object("avatars", "alice.png").is_none());
    }

    #[tokio::test]
    async fn memory_client_has_friends_but_no_profile_api() {
        let backend = MemoryBackend::new();
        let client = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));
        client.friends().send_request("bob").await.unwrap();
        assert_eq!(
            client.friends().pending_sent().await.unwrap(),
            vec!["bob".to_string()]
        );
        assert!(client.profiles().is_err());
        let _resolver: &ConversationResolver = client.resolver();
    }

    #[tokio::test]
    async fn direct_chat_notification_names_the_sender() {
        let backend = MemoryBackend::new();
        backend.seed_profile(Profile {
            id: "bob".into(),
            username: Some("bob".into()),
            display_name: Some("Bobby".into()),
            avatar_url: None,
            last_seen: None,
        });
        let listener = Arc::new(NotificationLog::default());
        let mut alice = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));
        alice.set_message_listener(listener.clone());
        let chat_id = alice
            .open_direct_chat("bob")
            .await
            .unwrap()
            .conversation_id()
            .to_string();

        let mut bob = VanishClient::with_remotes(config("bob"), Remotes::memory(&backend));
        bob.open_conversation(&chat_id)
            .await
            .unwrap()
            .send_text("are you there?", None)
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            listener.titles(),
            vec!["New message from Bobby".to_string()]
        );
    }

    #[tokio::test]
    async fn group_notification_uses_group_name() {
        let backend = MemoryBackend::new();
        let listener = Arc::new(NotificationLog::default());
        let mut alice = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));
        alice.set_message_listener(listener.clone());
        let group = alice
            .create_group("Team", &["bob".to_string()])
            .await
            .unwrap();
        alice.open_conversation(&group.id).await.unwrap();

        let mut bob = VanishClient::with_remotes(config("bob"), Remotes::memory(&backend));
        bob.open_conversation(&group.id)
            .await
            .unwrap()
            .send_text("standup?", None)
            .await
            .unwrap();
        settle().await;

        assert_eq!(listener.titles(), vec!["Team".to_string()]);
    }

    #[tokio::test]
    async fn sidebar_updates_follow_friend_requests() {
        let backend = MemoryBackend::new();
        let mut alice = VanishClient::with_remotes(config("alice"), Remotes::memory(&backend));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        alice
            .start_sidebar_updates(Arc::new(RequestLog(tx)))
            .await
            .unwrap();

        let bob = VanishClient::with_remotes(config("bob"), Remotes::memory(&backend));
        bob.friends().send_request("alice").await.unwrap();
        let senders = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(senders, vec!["bob".to_string()]);

        alice.shutdown().await;
        assert_eq!(backend.sidebar_subscriber_count("alice"), 0);
    }

    #[tokio::test]
    #[ignore]
    async fn run_vanish_client() {
        // 需要本地平台与测试账号：VANISH_SUPABASE_URL / VANISH_SUPABASE_ANON_KEY /
        // VANISH_TEST_EMAIL / VANISH_TEST_PASSWORD / VANISH_TEST_CHAT
        init_test_logger();

        let base = match ClientConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("缺少配置: {}", e);
                return;
            }
        };
        let email = std::env::var("VANISH_TEST_EMAIL").unwrap_or_default();
        let password = std::env::var("VANISH_TEST_PASSWORD").unwrap_or_default();

        info!("🔐 正在登录获取 token...");
        let session = match sign_in_with_password(&base.supabase_url, &base.anon_key, &email, &password).await {
            Ok(session) => session,
            Err(e) => {
                error!("登录失败: {}", e);
                return;
            }
        };

        let mut client = VanishClient::connect(base.with_session(&session)).await.unwrap();
        client.start_presence_tracking();
        let conversations = client.conversations().await.unwrap();
        info!("📋 会话数量: {}", conversations.len());

        if let Ok(chat_id) = std::env::var("VANISH_TEST_CHAT") {
            let session = client.open_conversation(&chat_id).await.unwrap();
            info!("📥 已加载 {} 条消息", session.messages().len());
            session.send_text("hello from rust", None).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        client.shutdown().await;
    }
}
