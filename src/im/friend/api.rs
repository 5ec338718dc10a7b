//! 好友 HTTP API 客户端
//!
//! 负责好友请求、好友关系、用户搜索与拉黑相关的 REST 请求

use crate::im::friend::models::{BlockRecord, FriendRequest, RequestResponse, RequestStatus};
use crate::im::presence::Profile;
use crate::im::remote::FriendRemote;
use crate::im::types::{handle_empty_response, handle_http_response, quote_filter_value, RestClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

/// 好友相关的 HTTP API 客户端
pub struct FriendApi {
    client: RestClient,
}

#[derive(Deserialize)]
struct FriendshipRow {
    #[serde(default)]
    profiles: Option<Profile>,
}

#[derive(Deserialize)]
struct ReceiverRow {
    receiver_id: String,
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: String,
}

/// 用户名或显示名模糊匹配的 `or` 过滤
fn search_filter(query: &str) -> String {
    let pattern = quote_filter_value(&format!("*{}*", query));
    format!("(username.ilike.{0},display_name.ilike.{0})", pattern)
}

impl FriendApi {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FriendRemote for FriendApi {
    async fn send_request(&self, sender_id: &str, receiver_id: &str) -> Result<()> {
        info!("[FriendAPI] 📨 发送好友请求 {} -> {}", sender_id, receiver_id);
        let response = self
            .client
            .post(&self.client.rest_url("friend_requests"))
            .json(&serde_json::json!({
                "sender_id": sender_id,
                "receiver_id": receiver_id,
            }))
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "发送好友请求").await
    }

    async fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let response = self
            .client
            .get(&self.client.rest_url("friend_requests"))
            .query(&[
                (
                    "select",
                    "id,sender_id,receiver_id,status,created_at,profiles:sender_id(id,username,display_name,avatar_url,last_seen)"
                        .to_string(),
                ),
                ("receiver_id", format!("eq.{}", user_id)),
                ("status", "eq.pending".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        let requests: Vec<FriendRequest> = handle_http_response(response, "待处理好友请求").await?;
        debug!("[FriendAPI] 待处理好友请求 {} 条", requests.len());
        Ok(requests)
    }

    async fn pending_sent(&self, user_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.client.rest_url("friend_requests"))
            .query(&[
                ("select", "receiver_id".to_string()),
                ("sender_id", format!("eq.{}", user_id)),
                ("status", "eq.pending".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<ReceiverRow> = handle_http_response(response, "已发送好友请求").await?;
        Ok(rows.into_iter().map(|r| r.receiver_id).collect())
    }

    async fn respond(&self, request_id: &str, answer: RequestResponse) -> Result<()> {
        let status = RequestStatus::from(answer);
        info!("[FriendAPI] 回应好友请求 {} -> {:?}", request_id, status);
        let response = self
            .client
            .patch(&self.client.rest_url("friend_requests"))
            .query(&[("id", format!("eq.{}", request_id))])
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "回应好友请求").await
    }

    async fn friends(&self, user_id: &str) -> Result<Vec<Profile>> {
        let response = self
            .client
            .get(&self.client.rest_url("friendships"))
            .query(&[
                (
                    "select",
                    "friend_id,profiles:friend_id(id,username,display_name,last_seen,avatar_url)"
                        .to_string(),
                ),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<FriendshipRow> = handle_http_response(response, "好友列表").await?;
        Ok(rows.into_iter().filter_map(|r| r.profiles).collect())
    }

    async fn search_profiles(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<Profile>> {
        let response = self
            .client
            .get(&self.client.rest_url("profiles"))
            .query(&[
                ("select", "id,username,display_name,avatar_url".to_string()),
                ("or", search_filter(query)),
                ("id", format!("neq.{}", user_id)),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_http_response(response, "搜索用户").await
    }

    async fn is_blocked(&self, user_id: &str, target_id: &str) -> Result<bool> {
        let response = self
            .client
            .get(&self.client.rest_url("blocked_users"))
            .query(&[
                ("select", "id".to_string()),
                (
                    "or",
                    format!(
                        "(and(blocker_id.eq.{0},blocked_id.eq.{1}),and(blocker_id.eq.{1},blocked_id.eq.{0}))",
                        user_id, target_id
                    ),
                ),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<IdRow> = handle_http_response(response, "拉黑状态").await?;
        Ok(!rows.is_empty())
    }

    async fn block(&self, user_id: &str, target_id: &str) -> Result<()> {
        info!("[FriendAPI] 🚫 {} 拉黑 {}", user_id, target_id);
        let record = BlockRecord {
            blocker_id: user_id.to_string(),
            blocked_id: target_id.to_string(),
        };
        let response = self
            .client
            .post(&self.client.rest_url("blocked_users"))
            .json(&record)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "拉黑用户").await
    }

    async fn unblock(&self, user_id: &str, target_id: &str) -> Result<()> {
        info!("[FriendAPI] {} 取消拉黑 {}", user_id, target_id);
        let response = self
            .client
            .delete(&self.client.rest_url("blocked_users"))
            .query(&[
                ("blocker_id", format!("eq.{}", user_id)),
                ("blocked_id", format!("eq.{}", target_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "取消拉黑").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_filter_quotes_user_input() {
        assert_eq!(
            search_filter("ann"),
            r#"(username.ilike."*ann*",display_name.ilike."*ann*")"#
        );
        // 逗号与括号留在引号内，不会截断 or 表达式
        assert_eq!(
            search_filter("a,b)"),
            r#"(username.ilike."*a,b)*",display_name.ilike."*a,b)*")"#
        );
    }
}
