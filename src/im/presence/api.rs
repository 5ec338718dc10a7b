//! 用户资料 HTTP API

use crate::im::remote::ProfileRemote;
use crate::im::types::{handle_empty_response, handle_http_response, in_filter, RestClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// profiles 表中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Profile {
    /// 展示名：优先 display_name，其次 username
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.username.as_deref())
            .unwrap_or("User")
    }
}

/// 可修改的资料字段
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

pub struct ProfileApi {
    client: RestClient,
}

impl ProfileApi {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let response = self
            .client
            .get(&self.client.rest_url("profiles"))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", user_id))])
            .send()
            .await
            .context("请求失败")?;
        let rows: Vec<Profile> = handle_http_response(response, "获取用户资料").await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(&self.client.rest_url("profiles"))
            .query(&[("select", "*".to_string()), ("id", in_filter(user_ids))])
            .send()
            .await
            .context("请求失败")?;
        handle_http_response(response, "批量获取用户资料").await
    }

    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<()> {
        info!("[ProfileAPI] 更新用户资料 user={}", user_id);
        let response = self
            .client
            .patch(&self.client.rest_url("profiles"))
            .query(&[("id", format!("eq.{}", user_id))])
            .json(update)
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "更新用户资料").await
    }
}

#[async_trait]
impl ProfileRemote for ProfileApi {
    async fn update_last_seen(&self) -> Result<()> {
        debug!("[ProfileAPI] 调用 update_last_seen");
        let response = self
            .client
            .post(&self.client.rpc_url("update_last_seen"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("请求失败")?;
        handle_empty_response(response, "更新在线时间").await
    }

    async fn update_avatar_url(&self, user_id: &str, url: Option<&str>) -> Result<()> {
        let update = ProfileUpdate {
            avatar_url: Some(url.map(|u| u.to_string())),
            ..Default::default()
        };
        self.update_profile(user_id, &update).await
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        self.get_profiles(user_ids).await
    }
}
