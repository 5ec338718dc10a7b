//! Vanish CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示会话功能
//! - `run`：登录真实平台，打开一个会话并输出收到的事件
//! - `demo`：在进程内后端上模拟两个用户的完整对话流程

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use vanish_sdk_core::im::conversation::Conversation;
use vanish_sdk_core::im::friend::FriendRequest;
use vanish_sdk_core::im::message::listener::MessageListener;
use vanish_sdk_core::im::message::Message;
use vanish_sdk_core::im::presence::{Profile, TypingUser};
use vanish_sdk_core::im::sidebar::SidebarListener;
use vanish_sdk_core::{sign_in_with_password, ClientConfig, MemoryBackend, Remotes, VanishClient};

/// Vanish CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "vanish-cli")]
#[command(about = "Vanish CLI 客户端 - 用于测试和展示阅后即焚聊天功能", long_about = None)]
struct Args {
    /// 日志级别（默认: info,vanish_sdk_core=debug）
    #[arg(long, default_value = "info,vanish_sdk_core=debug", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 登录平台并监听一个会话（平台地址读取 VANISH_SUPABASE_URL / VANISH_SUPABASE_ANON_KEY）
    Run {
        /// 登录邮箱
        #[arg(short, long)]
        email: String,

        /// 登录密码
        #[arg(short, long)]
        password: String,

        /// 要打开的会话 ID
        #[arg(long, conflicts_with = "with")]
        chat: Option<String>,

        /// 与该用户的单聊（不存在时创建）
        #[arg(long)]
        with: Option<String>,

        /// 打开会话后发送一条文本消息
        #[arg(long)]
        send: Option<String>,

        /// 运行时长（秒），0 表示持续运行
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
    /// 使用进程内后端运行演示
    Demo,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .map_err(|e| anyhow!("无法创建日志文件 debug.log: {}", e))?;

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 输出所有会话事件
struct CliMessageListener {
    tag: &'static str,
}

#[async_trait]
impl MessageListener for CliMessageListener {
    async fn on_message_added(&self, message: Message) {
        info!(
            "[CLI/{}] 📨 新消息 {} <{}>: {}",
            self.tag, message.id, message.sender_id, message.content
        );
    }

    async fn on_message_updated(&self, message: Message) {
        info!("[CLI/{}] ✏️ 消息已编辑 {}: {}", self.tag, message.id, message.content);
    }

    async fn on_message_removed(&self, message_id: String) {
        info!("[CLI/{}] 🗑️ 消息删除: {}", self.tag, message_id);
    }

    async fn on_messages_expired(&self, message_ids: Vec<String>) {
        info!("[CLI/{}] 🔥 消息已消失: {:?}", self.tag, message_ids);
    }

    async fn on_typing_changed(&self, typing_users: Vec<TypingUser>) {
        let names: Vec<&str> = typing_users.iter().map(|u| u.username.as_str()).collect();
        if names.is_empty() {
            info!("[CLI/{}] ⌨️ 没有人在输入", self.tag);
        } else {
            info!("[CLI/{}] ⌨️ 正在输入: {}", self.tag, names.join(", "));
        }
    }

    async fn on_new_message_notification(&self, title: String, preview: String) {
        info!("[CLI/{}] 🔔 {}: {}", self.tag, title, preview);
    }

    async fn on_session_error(&self, operation: String, error: String) {
        error!("[CLI/{}] ❌ {} 失败: {}", self.tag, operation, error);
    }
}

/// 输出好友请求、好友列表与会话列表的变化
struct CliSidebarListener;

#[async_trait]
impl SidebarListener for CliSidebarListener {
    async fn on_friend_requests_changed(&self, requests: Vec<FriendRequest>) {
        info!("[CLI/Sidebar] 📬 待处理好友请求 {} 条", requests.len());
        for request in &requests {
            let name = request
                .sender
                .as_ref()
                .map(|p| p.display_name().to_string())
                .unwrap_or_else(|| request.sender_id.clone());
            info!("[CLI/Sidebar]   - {} ({})", name, request.id);
        }
    }

    async fn on_friends_changed(&self, friends: Vec<Profile>) {
        let names: Vec<&str> = friends.iter().map(|p| p.display_name()).collect();
        info!("[CLI/Sidebar] 👥 好友 {} 人: {}", names.len(), names.join(", "));
    }

    async fn on_conversations_changed(&self, conversations: Vec<Conversation>) {
        info!("[CLI/Sidebar] 📋 会话列表更新，共 {} 个", conversations.len());
    }
}

async fn run_live(
    email: String,
    password: String,
    chat: Option<String>,
    with: Option<String>,
    send: Option<String>,
    duration: u64,
) -> Result<()> {
    let base = ClientConfig::from_env()?;

    info!("[CLI] 🔐 正在登录...");
    let session = sign_in_with_password(&base.supabase_url, &base.anon_key, &email, &password)
        .await
        .map_err(|e| anyhow!("登录失败: {}", e))?;
    info!("[CLI] ✅ 登录成功！用户ID: {}", session.user.id);

    let mut client = VanishClient::connect(base.with_session(&session))
        .await
        .map_err(|e| anyhow!("连接失败: {}", e))?;
    client.set_message_listener(Arc::new(CliMessageListener { tag: "Message" }));
    client.start_presence_tracking();
    if let Err(e) = client.start_sidebar_updates(Arc::new(CliSidebarListener)).await {
        warn!("[CLI] 侧边栏实时更新不可用: {}", e);
    }

    let conversations = client.conversations().await.unwrap_or_default();
    info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
    for conv in conversations.iter().take(5) {
        info!(
            "[CLI]   - {} | {:?} | {}",
            conv.id,
            conv.conversation_type,
            conv.name.as_deref().unwrap_or("-")
        );
    }

    let opened = match (chat, with) {
        (Some(chat_id), _) => Some(client.open_conversation(&chat_id).await?),
        (None, Some(user_id)) => Some(client.open_direct_chat(&user_id).await?),
        (None, None) => None,
    };
    if let Some(chat) = opened {
        info!(
            "[CLI] 📂 已打开会话 {}，当前 {} 条消息",
            chat.conversation_id(),
            chat.messages().len()
        );
        if let Some(text) = send {
            chat.send_text(&text, None).await?;
        }
    } else if send.is_some() {
        warn!("[CLI] 未指定会话，忽略 --send");
    }

    info!("[CLI] 📥 开始监听消息...");
    if duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", duration);
        sleep(Duration::from_secs(duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[CLI] 等待 Ctrl+C 失败: {}", e);
        }
    }

    client.shutdown().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}

fn demo_config(user: &str) -> ClientConfig {
    let mut config = ClientConfig::new("http://localhost", "demo");
    config.user_id = user.to_string();
    config.email = Some(format!("{}@vanish.local", user));
    config.access_token = "demo".to_string();
    config.typing_debounce = Duration::from_millis(500);
    config.sweep_interval = Duration::from_millis(200);
    config
}

async fn run_demo() -> Result<()> {
    info!("[CLI] 🧪 进程内演示：alice 与 bob");
    let backend = MemoryBackend::new();

    let mut alice = VanishClient::with_remotes(demo_config("alice"), Remotes::memory(&backend));
    alice.set_message_listener(Arc::new(CliMessageListener { tag: "alice" }));
    let mut bob = VanishClient::with_remotes(demo_config("bob"), Remotes::memory(&backend));
    bob.set_message_listener(Arc::new(CliMessageListener { tag: "bob" }));

    let chat_id = alice
        .open_direct_chat("bob")
        .await?
        .conversation_id()
        .to_string();
    bob.open_conversation(&chat_id).await?;

    let bob_chat = bob.session().ok_or_else(|| anyhow!("bob 的会话未打开"))?;
    bob_chat.on_input("hey").await?;
    sleep(Duration::from_millis(50)).await;
    bob_chat.send_text("hey alice!", None).await?;
    sleep(Duration::from_millis(50)).await;

    let alice_chat = alice.session().ok_or_else(|| anyhow!("alice 的会话未打开"))?;
    let greeting = alice_chat
        .messages()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("alice 没有收到消息"))?;
    alice_chat.toggle_reaction(&greeting.id, "👍").await?;
    alice_chat.mark_visible_read().await?;

    alice_chat.set_vanish_minutes(Some(1));
    let reply = alice_chat
        .send_text("hi bob, this one vanishes in a minute", Some(greeting.id.clone()))
        .await?;
    alice_chat.edit(&reply.id, "hi bob! this one vanishes in a minute").await?;
    sleep(Duration::from_millis(50)).await;

    for msg in bob.session().map(|s| s.messages()).unwrap_or_default() {
        info!(
            "[CLI/bob] 💬 {} | {} | 剩余 {}",
            msg.sender_id,
            msg.content,
            msg.time_remaining(chrono::Utc::now())
                .unwrap_or_else(|| "永久".to_string())
        );
    }

    alice.shutdown().await;
    bob.shutdown().await;
    info!("[CLI] ✅ 演示结束");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 Vanish CLI 客户端（测试模式）");
    match args.command {
        Command::Run {
            email,
            password,
            chat,
            with,
            send,
            duration,
        } => run_live(email, password, chat, with, send, duration).await,
        Command::Demo => run_demo().await,
    }
}
