pub mod auth;
pub mod client;
pub mod conversation;
pub mod error;
pub mod friend;
pub mod message;
pub mod presence;
pub mod realtime;
pub mod remote;
pub mod sidebar;
pub mod storage;
pub mod types;

// 重新导出认证相关函数
pub use auth::{sign_in_with_password, AuthSession};

// 重新导出会话视图相关类型
pub use message::{ChatSession, MessageListener, SessionContext, SessionOptions};

pub use error::ValidationError;
