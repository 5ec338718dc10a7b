//! Phoenix 频道协议帧
//!
//! 所有帧都是 JSON 文本：`{ topic, event, payload, ref, join_ref }`

use crate::im::message::models::{Message, MessageChange};
use crate::im::presence::PresencePayload;
use crate::im::remote::SidebarChange;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const PRESENCE: &str = "presence";
pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";

/// 心跳使用的保留 topic
pub const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl PhoenixFrame {
    pub fn new(topic: &str, event: &str, payload: Value, reference: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference,
            join_ref: None,
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self::new(PHOENIX_TOPIC, HEARTBEAT, json!({}), Some(reference))
    }

    /// `phx_reply` 的状态（`ok` / `error`）
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != PHX_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }
}

pub fn messages_topic(chat_id: &str) -> String {
    format!("realtime:messages:{}", chat_id)
}

pub fn presence_topic(chat_id: &str) -> String {
    format!("realtime:presence:{}", chat_id)
}

/// 侧边栏订阅的表：(变更类型, 表名, 事件, 按本人过滤的列)
pub const SIDEBAR_TABLES: [(SidebarChange, &str, &str, &str); 3] = [
    (SidebarChange::FriendRequests, "friend_requests", "*", "receiver_id"),
    (SidebarChange::Friendships, "friendships", "*", "user_id"),
    (SidebarChange::Memberships, "chat_members", "INSERT", "user_id"),
];

pub fn table_changes_topic(table: &str, user_id: &str) -> String {
    format!("realtime:{}_changes:{}", table, user_id)
}

/// 订阅单张表的 postgres_changes
pub fn table_changes_join_payload(table: &str, event: &str, filter: &str, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": event,
                "schema": "public",
                "table": table,
                "filter": filter,
            }],
        },
        "access_token": access_token,
    })
}

/// 订阅 messages 表中某个会话的全部变更
pub fn messages_join_payload(chat_id: &str, access_token: &str) -> Value {
    table_changes_join_payload(
        "messages",
        "*",
        &format!("chat_id=eq.{}", chat_id),
        access_token,
    )
}

pub fn presence_join_payload(access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [],
        },
        "access_token": access_token,
    })
}

/// presence track 帧的 payload
pub fn track_payload(payload: &PresencePayload) -> Value {
    json!({
        "type": "presence",
        "event": "track",
        "payload": payload,
    })
}

/// 解析 postgres_changes 推送为消息变更
///
/// 无法识别的类型或无法解析的记录返回 None（记录日志后丢弃）。
pub fn parse_message_change(payload: &Value) -> Option<MessageChange> {
    let data = payload.get("data")?;
    let kind = data.get("type").and_then(Value::as_str)?;

    let record = |field: &str| -> Option<Message> {
        let value = data.get(field)?.clone();
        match serde_json::from_value(value) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("[Realtime] 无法解析 {} 记录: {}", kind, e);
                None
            }
        }
    };

    match kind {
        "INSERT" => record("record").map(MessageChange::Insert),
        "UPDATE" => record("record").map(MessageChange::Update),
        "DELETE" => data
            .get("old_record")
            .and_then(|old| old.get("id"))
            .and_then(Value::as_str)
            .map(|id| MessageChange::Delete { id: id.to_string() }),
        other => {
            warn!("[Realtime] 未知的变更类型: {}", other);
            None
        }
    }
}
