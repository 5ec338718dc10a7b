//! 在线状态模块
//!
//! 输入状态（typing）上报与最近在线时间（last seen）维护

pub mod api;
pub mod last_seen;
pub mod typing;

use serde::{Deserialize, Serialize};

pub use api::{Profile, ProfileApi, ProfileUpdate};
pub use last_seen::{format_last_seen, is_user_online, LastSeenTracker, LAST_SEEN_INTERVAL};
pub use typing::{
    typing_peers, username_from_email, TypingReporter, TypingState, TYPING_DEBOUNCE,
};

/// 在 presence 频道中发布的本地状态（对端以每个 user_id 的最新一条为准）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: String,
    pub username: String,
    #[serde(rename = "isTyping", default)]
    pub is_typing: bool,
}

/// 正在输入的对端用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingUser {
    pub id: String,
    pub username: String,
}
