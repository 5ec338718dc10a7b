//! 对象存储 HTTP API

use crate::im::remote::ObjectStorage;
use crate::im::types::{handle_empty_response, RestClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

pub struct StorageApi {
    client: RestClient,
}

impl StorageApi {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStorage for StorageApi {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<String> {
        let url = self.client.storage_url(bucket, path);
        debug!("[StorageAPI] 上传 {} 字节 -> {}", bytes.len(), url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", upsert.to_string())
            .body(bytes)
            .send()
            .await
            .context("上传请求失败")?;
        handle_empty_response(response, "上传对象").await?;

        Ok(self.client.public_object_url(bucket, path))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.client.base_url(), bucket);
        let response = self
            .client
            .delete(&url)
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await
            .context("删除请求失败")?;
        handle_empty_response(response, "删除对象").await
    }
}
