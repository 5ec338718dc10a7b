//! 对象存储上传
//!
//! 不同用途使用不同的 bucket，大小与类型限制在本地校验，不合规的文件不会发起任何请求。

pub mod api;

use crate::im::error::ValidationError;
use crate::im::remote::{ObjectStorage, ProfileRemote};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub use api::StorageApi;

const MB: usize = 1024 * 1024;

/// 上传用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Avatar,
    File,
    Image,
    Voice,
}

impl UploadKind {
    pub fn bucket(&self) -> &'static str {
        match self {
            UploadKind::Avatar => "avatars",
            UploadKind::File => "chat-files",
            UploadKind::Image => "chat-images",
            UploadKind::Voice => "voice-messages",
        }
    }

    /// 单个对象的大小上限（字节）
    pub fn max_size(&self) -> usize {
        match self {
            UploadKind::Avatar => 2 * MB,
            UploadKind::File => 10 * MB,
            UploadKind::Image => 5 * MB,
            UploadKind::Voice => 10 * MB,
        }
    }

    pub fn validate(&self, size: usize, mime: &str) -> Result<(), ValidationError> {
        if size > self.max_size() {
            return Err(ValidationError::FileTooLarge {
                size,
                limit: self.max_size(),
            });
        }
        let accepted = match self {
            UploadKind::Avatar | UploadKind::Image => mime.starts_with("image/"),
            UploadKind::File => true,
            UploadKind::Voice => mime.starts_with("audio/"),
        };
        if !accepted {
            return Err(ValidationError::UnsupportedMimeType(mime.to_string()));
        }
        Ok(())
    }

    /// 对象路径
    ///
    /// - 头像：`{user}.{ext}`，同一用户覆盖写入
    /// - 图片：`{chat}/{user}_{millis}.{ext}`
    /// - 其他：`{user}/{millis}.{ext}`，语音固定为 webm
    pub fn object_path(
        &self,
        user_id: &str,
        chat_id: &str,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> String {
        let millis = now.timestamp_millis();
        match self {
            UploadKind::Avatar => format!("{}.{}", user_id, extension(file_name)),
            UploadKind::Image => {
                format!("{}/{}_{}.{}", chat_id, user_id, millis, extension(file_name))
            }
            UploadKind::File => format!("{}/{}.{}", user_id, millis, extension(file_name)),
            UploadKind::Voice => format!("{}/{}.webm", user_id, millis),
        }
    }
}

/// 文件扩展名，没有扩展名时使用 `bin`
fn extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "bin",
    }
}

/// 待上传的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }

    /// 录音数据
    pub fn voice(bytes: Vec<u8>) -> Self {
        Self::new("voice.webm", "audio/webm", bytes)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// 校验并上传附件，返回公开 URL
pub async fn upload_attachment(
    storage: &dyn ObjectStorage,
    kind: UploadKind,
    user_id: &str,
    chat_id: &str,
    attachment: Attachment,
) -> Result<String> {
    kind.validate(attachment.size(), &attachment.mime_type)?;

    let path = kind.object_path(user_id, chat_id, &attachment.file_name, Utc::now());
    info!(
        "[Storage] 📤 上传 {} ({}) -> {}/{}",
        attachment.file_name,
        format_file_size(attachment.size()),
        kind.bucket(),
        path
    );
    storage
        .upload(
            kind.bucket(),
            &path,
            attachment.bytes,
            &attachment.mime_type,
            kind == UploadKind::Avatar,
        )
        .await
}

/// 公开 URL 中的对象路径（bucket 之后的部分）
fn object_path_from_url<'a>(url: &'a str, bucket: &str) -> Option<&'a str> {
    let marker = format!("/{}/", bucket);
    url.rfind(&marker).map(|idx| &url[idx + marker.len()..])
}

/// 更换头像：先删除旧对象，再覆盖上传并写回用户资料
pub async fn upload_avatar(
    storage: &dyn ObjectStorage,
    profiles: &dyn ProfileRemote,
    user_id: &str,
    current_avatar: Option<&str>,
    attachment: Attachment,
) -> Result<String> {
    UploadKind::Avatar.validate(attachment.size(), &attachment.mime_type)?;

    if let Some(old) = current_avatar.and_then(|url| object_path_from_url(url, "avatars")) {
        if let Err(e) = storage.remove("avatars", &[old.to_string()]).await {
            warn!("[Storage] 删除旧头像失败: {}", e);
        }
    }

    let url = upload_attachment(storage, UploadKind::Avatar, user_id, "", attachment).await?;
    profiles.update_avatar_url(user_id, Some(&url)).await?;
    Ok(url)
}

/// 移除头像
pub async fn remove_avatar(
    storage: &dyn ObjectStorage,
    profiles: &dyn ProfileRemote,
    user_id: &str,
    current_avatar: &str,
) -> Result<()> {
    if let Some(path) = object_path_from_url(current_avatar, "avatars") {
        storage.remove("avatars", &[path.to_string()]).await?;
    }
    profiles.update_avatar_url(user_id, None).await
}

/// 文件大小展示：`B` / `KB` / `MB`，保留一位小数
pub fn format_file_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::remote::MemoryBackend;
    use chrono::TimeZone;

    #[test]
    fn size_limits_per_kind() {
        assert!(UploadKind::Avatar.validate(2 * MB, "image/png").is_ok());
        assert_eq!(
            UploadKind::Avatar.validate(2 * MB + 1, "image/png"),
            Err(ValidationError::FileTooLarge {
                size: 2 * MB + 1,
                limit: 2 * MB
            })
        );
        assert!(UploadKind::Image.validate(6 * MB, "image/jpeg").is_err());
        assert!(UploadKind::File.validate(10 * MB, "application/zip").is_ok());
        assert!(UploadKind::File.validate(10 * MB + 1, "application/zip").is_err());
    }

    #[test]
    fn image_kinds_require_image_mime() {
        assert_eq!(
            UploadKind::Avatar.validate(10, "application/pdf"),
            Err(ValidationError::UnsupportedMimeType("application/pdf".into()))
        );
        assert!(UploadKind::File.validate(10, "application/pdf").is_ok());
    }

    #[test]
    fn object_paths() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(
            UploadKind::Avatar.object_path("u1", "c1", "me.png", now),
            "u1.png"
        );
        assert_eq!(
            UploadKind::File.object_path("u1", "c1", "report.final.pdf", now),
            "u1/1700000000000.pdf"
        );
        assert_eq!(
            UploadKind::File.object_path("u1", "c1", "README", now),
            "u1/1700000000000.bin"
        );
        assert_eq!(
            UploadKind::Image.object_path("u1", "c1", "cat.jpg", now),
            "c1/u1_1700000000000.jpg"
        );
        assert_eq!(
            UploadKind::Voice.object_path("u1", "c1", "ignored.ogg", now),
            "u1/1700000000000.webm"
        );
    }

    #[test]
    fn formats_file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * MB + MB / 2), "5.5 MB");
    }

    #[tokio::test]
    async fn oversized_file_never_reaches_storage() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let big = Attachment::new("big.png", "image/png", vec![0; 5 * MB + 1]);

        let err = upload_attachment(&backend, UploadKind::Image, "u1", "c1", big)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }

    #[tokio::test]
    async fn avatar_replaces_previous_object() {
        let backend = MemoryBackend::new();
        let first = upload_avatar(
            &backend,
            &backend,
            "u1",
            None,
            Attachment::new("a.jpg", "image/jpeg", vec![1]),
        )
        .await
        .unwrap();
        assert!(backend.object("avatars", "u1.jpg").is_some());

        let second = upload_avatar(
            &backend,
            &backend,
            "u1",
            Some(&first),
            Attachment::new("b.png", "image/png", vec![2]),
        )
        .await
        .unwrap();

        assert!(backend.object("avatars", "u1.jpg").is_none());
        assert!(backend.object("avatars", "u1.png").is_some());
        assert_eq!(backend.avatar_url("u1"), Some(second));

        remove_avatar(&backend, &backend, "u1", &backend.avatar_url("u1").unwrap())
            .await
            .unwrap();
        assert!(backend.object("avatars", "u1.png").is_none());
        assert_eq!(backend.avatar_url("u1"), None);
    }
}
