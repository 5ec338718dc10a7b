//! 消息 HTTP API 客户端
//!
//! 负责 messages、message_reactions、message_reads 三张表的 REST 请求

use crate::im::message::models::{Message, MessageEdit, NewMessage};
use crate::im::message::reactions::ReactionRow;
use crate::im::message::receipts::ReadReceipt;
use crate::im::remote::{MessageRemote, ReactionRemote, ReceiptRemote};
use crate::im::types::{handle_empty_response, handle_http_response, in_filter, RestClient};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

pub struct MessageApi {
    client: RestClient,
}

impl MessageApi {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageRemote for MessageApi {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let url = self.client.rest_url("messages");
        debug!("[MessageAPI] 📡 拉取会话消息 chat={}", conversation_id);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("select", "*".to_string()),
                ("chat_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.asc".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;
        let messages: Vec<Message> = handle_http_response(response, "拉取消息").await?;
        info!(
            "[MessageAPI] 📥 会话 {} 拉取到 {} 条消息",
            conversation_id,
            messages.len()
        );
        Ok(messages)
    }

    async fn send_message(&self, msg: &NewMessage) -> Result<Message> {
        let response = self
            .client
            .post(&self.client.rest_url("messages"))
            .header("Prefer", "return=representation")
            .json(msg)
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<Message> = handle_http_response(response, "发送消息").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("发送消息后服务器未返回记录"))
    }

    async fn edit_message(
        &self,
        message_id: &str,
        sender_id: &str,
        edit: &MessageEdit,
    ) -> Result<()> {
        let response = self
            .client
            .patch(&self.client.rest_url("messages"))
            .query(&[
                ("id", format!("eq.{}", message_id)),
                ("sender_id", format!("eq.{}", sender_id)),
            ])
            .json(edit)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "编辑消息").await
    }

    async fn delete_message(&self, message_id: &str, sender_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(&self.client.rest_url("messages"))
            .query(&[
                ("id", format!("eq.{}", message_id)),
                ("sender_id", format!("eq.{}", sender_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "删除消息").await
    }
}

#[async_trait]
impl ReactionRemote for MessageApi {
    async fn fetch_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        let response = self
            .client
            .get(&self.client.rest_url("message_reactions"))
            .query(&[
                ("select", "message_id,emoji,user_id".to_string()),
                ("message_id", format!("eq.{}", message_id)),
            ])
            .send()
            .await
            .context("请求失败")?;
        handle_http_response(response, "获取表情回应").await
    }

    async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        let row = ReactionRow {
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        };
        let response = self
            .client
            .post(&self.client.rest_url("message_reactions"))
            .json(&row)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "添加表情回应").await
    }

    async fn remove_reactions(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: Option<&str>,
    ) -> Result<()> {
        let mut query = vec![
            ("message_id", format!("eq.{}", message_id)),
            ("user_id", format!("eq.{}", user_id)),
        ];
        if let Some(emoji) = emoji {
            query.push(("emoji", format!("eq.{}", emoji)));
        }
        let response = self
            .client
            .delete(&self.client.rest_url("message_reactions"))
            .query(&query)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "删除表情回应").await
    }
}

#[derive(Deserialize)]
struct ReadRow {
    message_id: String,
}

#[async_trait]
impl ReceiptRemote for MessageApi {
    async fn upsert_reads(&self, reads: &[ReadReceipt]) -> Result<()> {
        let response = self
            .client
            .post(&self.client.rest_url("message_reads"))
            .query(&[("on_conflict", "message_id,user_id")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(reads)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "标记已读").await
    }

    async fn read_message_ids(&self, user_id: &str, message_ids: &[String]) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.client.rest_url("message_reads"))
            .query(&[
                ("select", "message_id".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("message_id", in_filter(message_ids)),
            ])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<ReadRow> = handle_http_response(response, "获取已读记录").await?;
        Ok(rows.into_iter().map(|r| r.message_id).collect())
    }
}
