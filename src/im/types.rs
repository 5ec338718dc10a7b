//! REST 访问的公共部分：HTTP 客户端、URL 拼接与统一的响应处理

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

/// PostgREST 返回的错误体
#[derive(Debug, Deserialize)]
pub struct RestError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// 平台 REST 客户端
///
/// 认证头（`apikey` 与 `Authorization: Bearer`）在构建时写入 default_headers，
/// 各业务 API 共享同一个实例。
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: &str, anon_key: &str, access_token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(anon_key).context("无效的 anon key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", access_token))
                .context("无效的 access token")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/rest/v1/{table}`
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// `/rest/v1/rpc/{function}`
    pub fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    /// `/storage/v1/object/{bucket}/{path}`
    pub fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    /// 公开 bucket 的下载地址
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_request_id(self.http.get(url))
    }

    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_request_id(self.http.post(url))
    }

    pub fn patch(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_request_id(self.http.patch(url))
    }

    pub fn delete(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_request_id(self.http.delete(url))
    }

    fn with_request_id(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("x-request-id", Uuid::new_v4().to_string())
    }
}

/// PostgREST 的 `in.(..)` 过滤值
pub fn in_filter(values: &[String]) -> String {
    format!("in.({})", values.join(","))
}

/// 逻辑过滤（`or=(..)`）中的值：加双引号，转义 `\` 与 `"`
///
/// 用户输入中的 `,` `(` `)` `.` 在引号内不会被当作语法。
pub fn quote_filter_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// 通用 HTTP 响应处理：检查状态码并反序列化响应体
pub async fn handle_http_response<T: DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T> {
    let status = response.status();
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        return Err(status_error(operation_name, status, &body_str));
    }

    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}

/// 不关心响应体的请求（204 No Content 等）
pub async fn handle_empty_response(response: reqwest::Response, operation_name: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(operation_name, status, &body))
}

fn status_error(operation_name: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    error!(
        "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
        operation_name, status, body
    );
    match serde_json::from_str::<RestError>(body) {
        Ok(err) if !err.message.is_empty() => anyhow::anyhow!(
            "HTTP 错误 {} ({}): {}",
            status,
            err.code.unwrap_or_default(),
            err.message
        ),
        _ => anyhow::anyhow!("HTTP 错误 {}: {}", status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_platform_urls() {
        let client = RestClient::new("https://demo.supabase.co/", "anon", "token").unwrap();
        assert_eq!(client.rest_url("messages"), "https://demo.supabase.co/rest/v1/messages");
        assert_eq!(
            client.rpc_url("update_last_seen"),
            "https://demo.supabase.co/rest/v1/rpc/update_last_seen"
        );
        assert_eq!(
            client.public_object_url("avatars", "u1.png"),
            "https://demo.supabase.co/storage/v1/object/public/avatars/u1.png"
        );
    }

    #[test]
    fn in_filter_joins_values() {
        assert_eq!(in_filter(&["a".into(), "b".into()]), "in.(a,b)");
    }

    #[test]
    fn filter_values_are_quoted_and_escaped() {
        assert_eq!(quote_filter_value("*ann*"), r#""*ann*""#);
        assert_eq!(quote_filter_value("a,b(c)"), r#""a,b(c)""#);
        assert_eq!(quote_filter_value(r#"say "hi"\"#), r#""say \"hi\"\\""#);
    }

    #[test]
    fn rest_error_body_parses() {
        let err: RestError = serde_json::from_str(
            r#"{"code":"23505","message":"duplicate key","details":null,"hint":null}"#,
        )
        .unwrap();
        assert_eq!(err.code.as_deref(), Some("23505"));
        assert_eq!(err.message, "duplicate key");
    }
}
