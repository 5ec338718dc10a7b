//! 会话 HTTP API 客户端
//!
//! 负责 chats 与 chat_members 两张表的 REST 请求

use crate::im::conversation::models::{ChatMember, Conversation, NewConversation};
use crate::im::remote::ConversationRemote;
use crate::im::types::{handle_empty_response, handle_http_response, in_filter, RestClient};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

/// 会话相关的 HTTP API 客户端
pub struct ConversationApi {
    client: RestClient,
}

#[derive(Deserialize)]
struct MembershipRow {
    chat_id: String,
}

impl ConversationApi {
    /// `client` 应该已经带上认证头
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// 会话的全部成员
    pub async fn get_members(&self, chat_id: &str) -> Result<Vec<ChatMember>> {
        let response = self
            .client
            .get(&self.client.rest_url("chat_members"))
            .query(&[
                ("select", "chat_id,user_id,role".to_string()),
                ("chat_id", format!("eq.{}", chat_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_http_response(response, "获取会话成员").await
    }

    /// 退出会话或移除成员
    pub async fn remove_member(&self, chat_id: &str, user_id: &str) -> Result<()> {
        info!("[ConvAPI] 移除成员 chat={}, user={}", chat_id, user_id);
        let response = self
            .client
            .delete(&self.client.rest_url("chat_members"))
            .query(&[
                ("chat_id", format!("eq.{}", chat_id)),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "移除会话成员").await
    }
}

#[async_trait]
impl ConversationRemote for ConversationApi {
    async fn membership_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        debug!("[ConvAPI] 📡 请求用户 {} 的会话成员关系", user_id);
        let response = self
            .client
            .get(&self.client.rest_url("chat_members"))
            .query(&[
                ("select", "chat_id".to_string()),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<MembershipRow> = handle_http_response(response, "会话成员关系").await?;
        Ok(rows.into_iter().map(|r| r.chat_id).collect())
    }

    async fn fetch_conversations(&self, ids: &[String]) -> Result<Vec<Conversation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(&self.client.rest_url("chats"))
            .query(&[
                ("select", "*".to_string()),
                ("id", in_filter(ids)),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        let conversations: Vec<Conversation> = handle_http_response(response, "获取会话").await?;
        info!("[ConvAPI] ✅ 获取到 {} 个会话", conversations.len());
        Ok(conversations)
    }

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation> {
        let response = self
            .client
            .post(&self.client.rest_url("chats"))
            .header("Prefer", "return=representation")
            .json(conversation)
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<Conversation> = handle_http_response(response, "创建会话").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("创建会话后服务器未返回记录"))
    }

    async fn add_members(&self, members: &[ChatMember]) -> Result<()> {
        let response = self
            .client
            .post(&self.client.rest_url("chat_members"))
            .json(members)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "添加会话成员").await
    }

    async fn member_ids(&self, chat_id: &str) -> Result<Vec<String>> {
        let members = self.get_members(chat_id).await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }

    async fn update_default_vanish(&self, chat_id: &str, hours: Option<i64>) -> Result<()> {
        let response = self
            .client
            .patch(&self.client.rest_url("chats"))
            .query(&[("id", format!("eq.{}", chat_id))])
            .json(&serde_json::json!({ "default_vanish_hours": hours }))
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "更新会话可见时长").await
    }
}
