//! 已读回执

use crate::im::remote::ReceiptRemote;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// message_reads 表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: String,
    pub user_id: String,
}

/// 标记已读（按 message_id + user_id 去重写入），空列表不发请求
pub async fn mark_read(remote: &dyn ReceiptRemote, user_id: &str, message_ids: &[String]) -> Result<()> {
    if message_ids.is_empty() {
        return Ok(());
    }
    let reads: Vec<ReadReceipt> = message_ids
        .iter()
        .map(|id| ReadReceipt {
            message_id: id.clone(),
            user_id: user_id.to_string(),
        })
        .collect();
    remote.upsert_reads(&reads).await
}

/// 给定消息中当前用户尚未读过的数量
pub async fn unread_count(
    remote: &dyn ReceiptRemote,
    user_id: &str,
    message_ids: &[String],
) -> Result<usize> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let read: HashSet<String> = remote
        .read_message_ids(user_id, message_ids)
        .await?
        .into_iter()
        .collect();
    Ok(message_ids.iter().filter(|id| !read.contains(*id)).count())
}
