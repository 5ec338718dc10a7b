//! 侧边栏实时刷新
//!
//! 订阅好友请求、好友关系与会话成员的变更，变更到达后重新拉取对应列表并通知监听器。

pub mod listener;
pub mod watcher;

pub use listener::{EmptySidebarListener, SidebarListener};
pub use watcher::SidebarWatcher;
