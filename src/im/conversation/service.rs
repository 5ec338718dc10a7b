//! 会话服务层
//!
//! 打开单聊（不存在时创建）、创建群聊、会话列表与会话设置

use crate::im::conversation::models::{
    ChatMember, ChatSettings, Conversation, MemberRole, NewConversation,
};
use crate::im::error::ValidationError;
use crate::im::remote::ConversationRemote;
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConversationResolver {
    remote: Arc<dyn ConversationRemote>,
}

impl ConversationResolver {
    pub fn new(remote: Arc<dyn ConversationRemote>) -> Self {
        Self { remote }
    }

    /// 打开与 `target` 的单聊
    ///
    /// 双方共同所在的会话中存在单聊则直接返回；否则创建新的单聊并加入双方。
    pub async fn open_direct(&self, me: &str, target: &str) -> Result<Conversation> {
        if me == target {
            return Err(ValidationError::SelfConversation.into());
        }

        let mine: HashSet<String> = self
            .remote
            .membership_chat_ids(me)
            .await?
            .into_iter()
            .collect();
        let common: Vec<String> = self
            .remote
            .membership_chat_ids(target)
            .await?
            .into_iter()
            .filter(|id| mine.contains(id))
            .collect();
        debug!(
            "[ConvResolver] {} 与 {} 共同所在会话 {} 个",
            me,
            target,
            common.len()
        );

        if !common.is_empty() {
            let existing = self
                .remote
                .fetch_conversations(&common)
                .await?
                .into_iter()
                .find(|c| c.is_direct());
            if let Some(conversation) = existing {
                info!("[ConvResolver] ✅ 复用已有单聊 {}", conversation.id);
                return Ok(conversation);
            }
        }

        let conversation = self
            .remote
            .create_conversation(&NewConversation::direct(me))
            .await?;
        self.remote
            .add_members(&[
                ChatMember::new(&conversation.id, me, None),
                ChatMember::new(&conversation.id, target, None),
            ])
            .await?;
        info!("[ConvResolver] 🆕 创建单聊 {} ({} <-> {})", conversation.id, me, target);
        Ok(conversation)
    }

    /// 创建群聊：创建者为管理员，其余为普通成员
    pub async fn create_group(
        &self,
        me: &str,
        name: &str,
        members: &[String],
    ) -> Result<Conversation> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyGroupName.into());
        }
        let others: Vec<&String> = members.iter().filter(|m| m.as_str() != me).collect();
        if others.is_empty() {
            return Err(ValidationError::EmptyGroupMembers.into());
        }

        let conversation = self
            .remote
            .create_conversation(&NewConversation::group(name, me))
            .await?;

        let mut rows = vec![ChatMember::new(&conversation.id, me, Some(MemberRole::Admin))];
        rows.extend(
            others
                .into_iter()
                .map(|id| ChatMember::new(&conversation.id, id, Some(MemberRole::Member))),
        );
        self.remote.add_members(&rows).await?;

        info!(
            "[ConvResolver] 🆕 创建群聊 {} \"{}\"，成员 {} 人",
            conversation.id,
            name.trim(),
            rows.len()
        );
        Ok(conversation)
    }

    /// 当前用户所在的全部会话（新建的在前）
    pub async fn list_conversations(&self, me: &str) -> Result<Vec<Conversation>> {
        let ids = self.remote.membership_chat_ids(me).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.remote.fetch_conversations(&ids).await
    }

    pub async fn get_conversation(&self, chat_id: &str) -> Result<Conversation> {
        self.remote
            .fetch_conversations(&[chat_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("会话不存在: {}", chat_id))
    }

    pub async fn chat_settings(&self, chat_id: &str, me: &str) -> Result<ChatSettings> {
        let conversation = self.get_conversation(chat_id).await?;
        Ok(ChatSettings {
            default_vanish_hours: conversation.default_vanish_hours,
            is_admin: conversation.is_admin(me),
        })
    }

    pub async fn update_default_vanish(&self, chat_id: &str, hours: Option<i64>) -> Result<()> {
        info!("[ConvResolver] 会话 {} 默认可见时长 -> {:?} 小时", chat_id, hours);
        self.remote.update_default_vanish(chat_id, hours).await
    }
}
