//! 会话本地模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话类型：单聊 / 群聊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Direct,
    Group,
}

/// 会话记录（对应远端 chats 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub default_vanish_hours: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_direct(&self) -> bool {
        self.conversation_type == ConversationType::Direct
    }

    /// 单聊双方都可以修改设置；群聊只有创建者可以
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.is_direct() || self.created_by.as_deref() == Some(user_id)
    }

    /// 会话默认的阅后即焚时长（分钟）
    pub fn default_vanish_minutes(&self) -> Option<i64> {
        self.default_vanish_hours.filter(|h| *h > 0).map(|h| h * 60)
    }
}

/// 创建会话的请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewConversation {
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl NewConversation {
    pub fn direct(created_by: &str) -> Self {
        Self {
            conversation_type: ConversationType::Direct,
            name: None,
            created_by: Some(created_by.to_string()),
        }
    }

    pub fn group(name: &str, created_by: &str) -> Self {
        Self {
            conversation_type: ConversationType::Group,
            name: Some(name.trim().to_string()),
            created_by: Some(created_by.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

/// 会话成员（对应远端 chat_members 表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub chat_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
}

impl ChatMember {
    pub fn new(chat_id: &str, user_id: &str, role: Option<MemberRole>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            role,
        }
    }
}

/// 会话设置（默认可见时长与当前用户是否可修改）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub default_vanish_hours: Option<i64>,
    pub is_admin: bool,
}
