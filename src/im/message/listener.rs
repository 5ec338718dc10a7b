//! 会话消息监听器
//!
//! 调用方注册后，在当前打开的会话中接收消息增删改、过期清理与输入状态等事件。

use crate::im::message::models::Message;
use crate::im::presence::TypingUser;
use async_trait::async_trait;

/// 通知预览的最大字符数
pub const NOTIFICATION_PREVIEW_CHARS: usize = 50;

/// 会话消息监听器
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// 有新消息进入本地列表（初始加载不会触发）
    async fn on_message_added(&self, message: Message);

    /// 消息被编辑
    async fn on_message_updated(&self, message: Message);

    /// 消息被删除（远端删除或本地删除成功）
    async fn on_message_removed(&self, message_id: String);

    /// 定时清理移除了已过期的消息
    async fn on_messages_expired(&self, message_ids: Vec<String>);

    /// 正在输入的对端列表发生变化
    async fn on_typing_changed(&self, typing_users: Vec<TypingUser>);

    /// 来自其他用户的新消息提醒
    ///
    /// - `title`: 会话名称或发送者
    /// - `preview`: 截断后的消息内容
    async fn on_new_message_notification(&self, title: String, preview: String);

    /// 远程调用失败（已记录日志，本地状态保持不变）
    async fn on_session_error(&self, operation: String, error: String);
}

/// 空的消息监听器实现（默认实现）
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_message_added(&self, _message: Message) {}
    async fn on_message_updated(&self, _message: Message) {}
    async fn on_message_removed(&self, _message_id: String) {}
    async fn on_messages_expired(&self, _message_ids: Vec<String>) {}
    async fn on_typing_changed(&self, _typing_users: Vec<TypingUser>) {}
    async fn on_new_message_notification(&self, _title: String, _preview: String) {}
    async fn on_session_error(&self, _operation: String, _error: String) {}
}

/// 通知预览：超过 50 个字符时截断并追加 `...`
pub fn notification_preview(content: &str) -> String {
    if content.chars().count() > NOTIFICATION_PREVIEW_CHARS {
        let head: String = content.chars().take(NOTIFICATION_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}
