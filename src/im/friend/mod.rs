//! 联系人（好友）模块
//!
//! 好友请求、好友列表、用户搜索与拉黑

pub mod api;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use api::FriendApi;
pub use models::{
    filter_search_results, BlockRecord, FriendRequest, RequestResponse, RequestStatus,
};
pub use service::FriendService;
