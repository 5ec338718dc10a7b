//! 好友模型定义

use crate::im::presence::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 搜索结果上限
pub const SEARCH_LIMIT: usize = 10;

/// 好友请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

/// 对好友请求的回应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResponse {
    Accepted,
    Declined,
}

impl From<RequestResponse> for RequestStatus {
    fn from(value: RequestResponse) -> Self {
        match value {
            RequestResponse::Accepted => RequestStatus::Accepted,
            RequestResponse::Declined => RequestStatus::Declined,
        }
    }
}

/// friend_requests 表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// 发送者资料（通过外键关联查询带出）
    #[serde(default, rename = "profiles")]
    pub sender: Option<Profile>,
}

/// 拉黑记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub blocker_id: String,
    pub blocked_id: String,
}

/// 过滤搜索结果：排除自己、已是好友与已发送过请求的用户，最多保留 10 个
pub fn filter_search_results(
    candidates: Vec<Profile>,
    me: &str,
    friend_ids: &HashSet<String>,
    pending_sent: &HashSet<String>,
) -> Vec<Profile> {
    candidates
        .into_iter()
        .filter(|p| p.id != me && !friend_ids.contains(&p.id) && !pending_sent.contains(&p.id))
        .take(SEARCH_LIMIT)
        .collect()
}
