//! 消息模块
//!
//! 消息模型、本地存储、过期清理、表情回应、已读回执，以及把它们串起来的 `ChatSession`。

pub mod api;
pub mod listener;
pub mod models;
pub mod reactions;
pub mod receipts;
pub mod service;
pub mod store;
pub mod sweeper;

// 重新导出主要类型和函数
pub use api::MessageApi;
pub use listener::{notification_preview, EmptyMessageListener, MessageListener};
pub use models::{
    Message, MessageChange, MessageEdit, MessagePayload, NewMessage,
    CHAT_VISIBILITY_HOUR_OPTIONS, EDIT_WINDOW_MINUTES, VANISH_MINUTE_OPTIONS,
};
pub use reactions::{toggle_reaction, ReactionRow, ReactionSummary, REACTION_EMOJIS};
pub use receipts::{mark_read, unread_count, ReadReceipt};
pub use service::{ChatSession, SessionContext, SessionOptions};
pub use store::MessageStore;
pub use sweeper::{ExpirySweeper, SWEEP_INTERVAL};
