//! 好友服务
//!
//! 以当前用户身份调用 `FriendRemote`，并在搜索结果上排除自己、已有好友与已发出请求的用户。

use crate::im::friend::models::{filter_search_results, FriendRequest, RequestResponse, SEARCH_LIMIT};
use crate::im::presence::Profile;
use crate::im::remote::FriendRemote;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct FriendService {
    remote: Arc<dyn FriendRemote>,
    user_id: String,
}

impl FriendService {
    pub fn new(remote: Arc<dyn FriendRemote>, user_id: &str) -> Self {
        Self {
            remote,
            user_id: user_id.to_string(),
        }
    }

    pub async fn send_request(&self, receiver_id: &str) -> Result<()> {
        self.remote.send_request(&self.user_id, receiver_id).await
    }

    /// 收到的待处理请求
    pub async fn pending_requests(&self) -> Result<Vec<FriendRequest>> {
        self.remote.pending_requests(&self.user_id).await
    }

    pub async fn pending_sent(&self) -> Result<Vec<String>> {
        self.remote.pending_sent(&self.user_id).await
    }

    pub async fn accept(&self, request_id: &str) -> Result<()> {
        self.remote.respond(request_id, RequestResponse::Accepted).await
    }

    pub async fn decline(&self, request_id: &str) -> Result<()> {
        self.remote.respond(request_id, RequestResponse::Declined).await
    }

    pub async fn friends(&self) -> Result<Vec<Profile>> {
        self.remote.friends(&self.user_id).await
    }

    /// 按用户名或显示名搜索可添加的用户，空查询直接返回空列表
    pub async fn search(&self, query: &str) -> Result<Vec<Profile>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .remote
            .search_profiles(&self.user_id, query, SEARCH_LIMIT)
            .await?;
        let friend_ids: HashSet<String> = self.friends().await?.into_iter().map(|p| p.id).collect();
        let pending: HashSet<String> = self.pending_sent().await?.into_iter().collect();
        let results = filter_search_results(candidates, &self.user_id, &friend_ids, &pending);
        debug!("[Friend] 搜索 {:?} 得到 {} 个结果", query, results.len());
        Ok(results)
    }

    pub async fn is_blocked(&self, target_id: &str) -> Result<bool> {
        self.remote.is_blocked(&self.user_id, target_id).await
    }

    pub async fn block(&self, target_id: &str) -> Result<()> {
        self.remote.block(&self.user_id, target_id).await
    }

    pub async fn unblock(&self, target_id: &str) -> Result<()> {
        self.remote.unblock(&self.user_id, target_id).await
    }
}
