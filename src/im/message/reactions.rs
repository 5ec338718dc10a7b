//! 表情回应
//!
//! 每个用户对同一条消息最多保留一个表情：再次点击同一表情取消，点击其他表情则替换。

use crate::im::remote::ReactionRemote;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 可选表情（展示顺序固定）
pub const REACTION_EMOJIS: [&str; 6] = ["❤️", "👍", "😂", "😮", "😢", "🔥"];

/// message_reactions 表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRow {
    #[serde(default)]
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// 单个表情的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: &'static str,
    pub count: usize,
    pub has_reacted: bool,
}

/// 按固定表情顺序汇总，计数为 0 的表情不出现
pub fn group_reactions(rows: &[ReactionRow], me: &str) -> Vec<ReactionSummary> {
    REACTION_EMOJIS
        .iter()
        .map(|&emoji| {
            let matching: Vec<&ReactionRow> = rows.iter().filter(|r| r.emoji == emoji).collect();
            ReactionSummary {
                emoji,
                count: matching.len(),
                has_reacted: matching.iter().any(|r| r.user_id == me),
            }
        })
        .filter(|s| s.count > 0)
        .collect()
}

/// 点击表情后需要执行的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// 取消自己的同一表情
    Remove,
    /// 删除自己原有的表情后添加新表情
    Replace,
    Add,
}

pub fn plan_toggle(current: &[ReactionSummary], emoji: &str) -> ToggleAction {
    if current.iter().any(|s| s.emoji == emoji && s.has_reacted) {
        ToggleAction::Remove
    } else if current.iter().any(|s| s.has_reacted) {
        ToggleAction::Replace
    } else {
        ToggleAction::Add
    }
}

/// 切换表情并返回最新汇总
pub async fn toggle_reaction(
    remote: &dyn ReactionRemote,
    message_id: &str,
    me: &str,
    emoji: &str,
) -> Result<Vec<ReactionSummary>> {
    if !REACTION_EMOJIS.contains(&emoji) {
        return Err(anyhow!("不支持的表情: {}", emoji));
    }

    let rows = remote.fetch_reactions(message_id).await?;
    let action = plan_toggle(&group_reactions(&rows, me), emoji);
    debug!("[Reactions] {} 对消息 {} 执行 {:?} {}", me, message_id, action, emoji);

    match action {
        ToggleAction::Remove => {
            remote.remove_reactions(message_id, me, Some(emoji)).await?;
        }
        ToggleAction::Replace => {
            remote.remove_reactions(message_id, me, None).await?;
            remote.add_reaction(message_id, me, emoji).await?;
        }
        ToggleAction::Add => {
            remote.add_reaction(message_id, me, emoji).await?;
        }
    }

    let rows = remote.fetch_reactions(message_id).await?;
    Ok(group_reactions(&rows, me))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::remote::MemoryBackend;

    fn row(user: &str, emoji: &str) -> ReactionRow {
        ReactionRow {
            message_id: "m1".into(),
            user_id: user.into(),
            emoji: emoji.into(),
        }
    }

    #[test]
    fn groups_in_fixed_order_and_drops_empty() {
        let rows = vec![row("bob", "🔥"), row("alice", "❤️"), row("carol", "🔥")];
        let grouped = group_reactions(&rows, "alice");
        assert_eq!(
            grouped,
            vec![
                ReactionSummary {
                    emoji: "❤️",
                    count: 1,
                    has_reacted: true
                },
                ReactionSummary {
                    emoji: "🔥",
                    count: 2,
                    has_reacted: false
                },
            ]
        );
    }

    #[test]
    fn plans_toggle_actions() {
        let grouped = group_reactions(&[row("alice", "👍"), row("bob", "😂")], "alice");
        assert_eq!(plan_toggle(&grouped, "👍"), ToggleAction::Remove);
        assert_eq!(plan_toggle(&grouped, "😂"), ToggleAction::Replace);
        assert_eq!(plan_toggle(&[], "😂"), ToggleAction::Add);
    }

    #[tokio::test]
    async fn one_reaction_per_user() {
        let backend = MemoryBackend::new();

        let after = toggle_reaction(&backend, "m1", "alice", "👍").await.unwrap();
        assert_eq!(after.len(), 1);

        let after = toggle_reaction(&backend, "m1", "alice", "🔥").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].emoji, "🔥");
        assert!(after[0].has_reacted);

        let after = toggle_reaction(&backend, "m1", "alice", "🔥").await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn unknown_emoji_is_rejected() {
        let backend = MemoryBackend::new();
        assert!(toggle_reaction(&backend, "m1", "alice", "🍕").await.is_err());
    }
}
