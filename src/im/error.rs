//! 本地校验错误
//!
//! 远程调用失败统一使用 `anyhow::Error`；本地规则校验失败使用 `ValidationError`，
//! 调用方可以通过 `downcast_ref::<ValidationError>()` 区分两类错误。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("消息内容为空")]
    EmptyMessage,

    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: usize, limit: usize },

    #[error("不支持的文件类型: {0}")]
    UnsupportedMimeType(String),

    #[error("消息已超过可编辑时间窗口")]
    EditWindowElapsed,

    #[error("只能操作自己发送的消息")]
    NotMessageOwner,

    #[error("消息不存在: {0}")]
    UnknownMessage(String),

    #[error("群组名称为空")]
    EmptyGroupName,

    #[error("群组至少需要一个成员")]
    EmptyGroupMembers,

    #[error("不能与自己建立会话")]
    SelfConversation,
}
