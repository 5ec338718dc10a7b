pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ClientConfig, VanishClient},
    conversation::{Conversation, ConversationResolver},
    message::{ChatSession, Message, MessageListener},
    remote::{MemoryBackend, Remotes},
    sign_in_with_password, ValidationError,
};
