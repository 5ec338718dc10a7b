//! 消息模型定义

use crate::im::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 消息可编辑的时间窗口（分钟）
pub const EDIT_WINDOW_MINUTES: i64 = 15;

/// 单条消息可选的阅后即焚时长（分钟）
pub const VANISH_MINUTE_OPTIONS: [i64; 7] = [1, 5, 30, 60, 360, 720, 1440];

/// 会话默认可见时长选项（小时）
pub const CHAT_VISIBILITY_HOUR_OPTIONS: [i64; 6] = [1, 6, 12, 24, 48, 168];

/// 消息记录（与远端 messages 表的行结构对应）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "chat_id")]
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub vanish_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio_duration: Option<i32>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// 消息的主要载荷（语音 > 文件 > 文本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload<'a> {
    Text(&'a str),
    Audio {
        url: &'a str,
        duration: Option<i32>,
    },
    File {
        url: &'a str,
        name: Option<&'a str>,
        mime: Option<&'a str>,
    },
}

impl Message {
    /// 阅后即焚时间已到（`vanish_at <= now`）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.vanish_at, Some(at) if at <= now)
    }

    pub fn payload(&self) -> MessagePayload<'_> {
        if let Some(url) = self.audio_url.as_deref() {
            return MessagePayload::Audio {
                url,
                duration: self.audio_duration,
            };
        }
        if let Some(url) = self.file_url.as_deref() {
            return MessagePayload::File {
                url,
                name: self.file_name.as_deref(),
                mime: self.file_type.as_deref(),
            };
        }
        MessagePayload::Text(&self.content)
    }

    /// 发送后 15 分钟内允许编辑
    pub fn can_edit(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at <= Duration::minutes(EDIT_WINDOW_MINUTES)
    }

    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    /// 剩余可见时间的展示文本，未设置阅后即焚时返回 None
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<String> {
        let vanish_at = self.vanish_at?;
        let remaining = (vanish_at - now).num_milliseconds();
        if remaining <= 0 {
            return Some("Now".to_string());
        }

        let hours = remaining / 3_600_000;
        let minutes = (remaining % 3_600_000) / 60_000;
        let seconds = (remaining % 60_000) / 1000;

        let text = if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m", minutes)
        } else {
            format!("{}s", seconds)
        };
        Some(text)
    }
}

/// 待发送的消息（insert 请求体）
///
/// 通过 `text` / `audio` / `file` 构造，保证只有一种主要载荷。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub vanish_at: Option<DateTime<Utc>>,
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl NewMessage {
    fn base(chat_id: &str, sender_id: &str, content: String) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            vanish_at: None,
            reply_to: None,
            audio_url: None,
            audio_duration: None,
            file_url: None,
            file_type: None,
            file_name: None,
        }
    }

    pub fn text(chat_id: &str, sender_id: &str, text: &str) -> Self {
        Self::base(chat_id, sender_id, text.trim().to_string())
    }

    pub fn audio(chat_id: &str, sender_id: &str, url: String, duration: i32) -> Self {
        let mut msg = Self::base(chat_id, sender_id, "🎤 Voice message".to_string());
        msg.audio_url = Some(url);
        msg.audio_duration = Some(duration);
        msg
    }

    pub fn file(chat_id: &str, sender_id: &str, url: String, name: &str, mime: &str) -> Self {
        let mut msg = Self::base(chat_id, sender_id, format!("📎 {}", name));
        msg.file_url = Some(url);
        msg.file_type = Some(mime.to_string());
        msg.file_name = Some(name.to_string());
        msg
    }

    pub fn reply_to(mut self, message_id: Option<String>) -> Self {
        self.reply_to = message_id;
        self
    }

    /// 设置阅后即焚时长（分钟），None 表示永久
    pub fn vanish_after(mut self, minutes: Option<i64>, now: DateTime<Utc>) -> Self {
        self.vanish_at = minutes
            .filter(|m| *m > 0)
            .map(|m| now + Duration::minutes(m));
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_attachment = self.audio_url.is_some() || self.file_url.is_some();
        if !has_attachment && self.content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(())
    }
}

/// 编辑消息的 update 请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEdit {
    pub content: String,
    pub edited_at: DateTime<Utc>,
    pub original_content: String,
}

impl MessageEdit {
    /// 基于原消息构造编辑内容；多次编辑时保留第一次编辑前的原文
    pub fn for_message(
        msg: &Message,
        new_content: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let content = new_content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(Self {
            content: content.to_string(),
            edited_at: now,
            original_content: msg
                .original_content
                .clone()
                .unwrap_or_else(|| msg.content.clone()),
        })
    }

    /// 将编辑应用到本地记录（乐观更新）
    pub fn apply_to(&self, msg: &mut Message) {
        msg.content = self.content.clone();
        msg.edited_at = Some(self.edited_at);
        msg.original_content = Some(self.original_content.clone());
    }
}

/// 远端推送的消息变更事件
#[derive(Debug, Clone, PartialEq)]
pub enum MessageChange {
    Insert(Message),
    Update(Message),
    Delete { id: String },
}

#[cfg(test)]
pub(crate) fn sample_message(id: &str, created_at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: "chat-1".to_string(),
        sender_id: "alice".to_string(),
        content: format!("hello {}", id),
        created_at,
        vanish_at: None,
        reply_to: None,
        edited_at: None,
        original_content: None,
        audio_url: None,
        audio_duration: None,
        file_url: None,
        file_type: None,
        file_name: None,
    }
}
