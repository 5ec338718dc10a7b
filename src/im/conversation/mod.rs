//! 会话模块
//!
//! 单聊/群聊的创建与查找、会话设置

pub mod api;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use api::ConversationApi;
pub use models::{ChatMember, ChatSettings, Conversation, ConversationType, MemberRole, NewConversation};
pub use service::ConversationResolver;
