//! 登录认证
//!
//! 使用平台认证服务的密码模式换取 access token，之后所有 REST 与实时请求都携带该 token。

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PasswordSignIn<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// 登录成功后的会话
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: AuthUser,
}

/// 认证服务的错误体（不同版本字段名不同）
#[derive(Debug, Default, Deserialize)]
struct AuthError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AuthError {
    fn describe(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

fn token_url(supabase_url: &str) -> String {
    format!(
        "{}/auth/v1/token?grant_type=password",
        supabase_url.trim_end_matches('/')
    )
}

/// 解析认证响应
fn parse_auth_response(success: bool, status: &str, text: &str) -> Result<AuthSession> {
    if !success {
        let reason = serde_json::from_str::<AuthError>(text)
            .ok()
            .and_then(AuthError::describe)
            .unwrap_or_else(|| text.to_string());
        return Err(anyhow!("登录失败 (HTTP {}): {}", status, reason));
    }
    serde_json::from_str(text).with_context(|| format!("解析登录响应失败，原始响应: {}", text))
}

/// 邮箱 + 密码登录
pub async fn sign_in_with_password(
    supabase_url: &str,
    anon_key: &str,
    email: &str,
    password: &str,
) -> Result<AuthSession> {
    let client = reqwest::Client::new();
    let request_id = Uuid::new_v4().to_string();
    let url = token_url(supabase_url);

    info!("🔐 正在登录...");
    debug!("   URL: {}", url);
    debug!("   邮箱: {}", email);
    debug!("   RequestID: {}", request_id);

    let response = client
        .post(&url)
        .header("apikey", anon_key)
        .header("Content-Type", "application/json")
        .header("x-request-id", &request_id)
        .json(&PasswordSignIn { email, password })
        .send()
        .await
        .context("请求失败")?;

    let status = response.status();
    let text = response.text().await.context("读取响应失败")?;
    let session = parse_auth_response(status.is_success(), status.as_str(), &text)?;

    info!("✅ 登录成功，用户ID: {}", session.user.id);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_password_grant_url() {
        assert_eq!(
            token_url("https://demo.supabase.co/"),
            "https://demo.supabase.co/auth/v1/token?grant_type=password"
        );
    }

    #[test]
    fn parses_session() {
        let text = r#"{
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r1",
            "user": { "id": "u1", "email": "jane@example.com", "aud": "authenticated" }
        }"#;
        let session = parse_auth_response(true, "200", text).unwrap();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.user.email.as_deref(), Some("jane@example.com"));
        assert_eq!(session.expires_in, Some(3600));
    }

    #[test]
    fn surfaces_error_description() {
        let text = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        let err = parse_auth_response(false, "400", text).unwrap_err();
        assert!(err.to_string().contains("Invalid login credentials"));

        let err = parse_auth_response(false, "500", "upstream down").unwrap_err();
        assert!(err.to_string().contains("upstream down"));
    }
}
