//! 实时推送
//!
//! 基于 Phoenix 频道协议的 WebSocket 客户端：订阅消息表变更、会话 presence，
//! 以及侧边栏依赖的好友请求、好友关系、会话成员变更。

pub mod presence_state;
pub mod protocol;
pub mod socket;

use crate::im::message::models::MessageChange;
use crate::im::presence::PresencePayload;
use crate::im::realtime::presence_state::PresenceState;
use crate::im::realtime::protocol::{
    messages_join_payload, messages_topic, parse_message_change, presence_join_payload,
    presence_topic, table_changes_join_payload, table_changes_topic, track_payload,
    PhoenixFrame, PHX_CLOSE, PHX_ERROR, POSTGRES_CHANGES, PRESENCE, PRESENCE_DIFF,
    PRESENCE_STATE, SIDEBAR_TABLES,
};
use crate::im::realtime::socket::Subscription;
use crate::im::remote::{
    ChannelHandle, MessageFeed, PresenceChannel, PresenceFeed, RealtimeRemote, SidebarChange,
    SidebarFeed,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use socket::{RealtimeSocket, HEARTBEAT_INTERVAL};

/// 实时推送客户端
pub struct RealtimeClient {
    socket: Arc<RealtimeSocket>,
    access_token: String,
}

impl RealtimeClient {
    pub async fn connect(url: &str, access_token: &str, heartbeat: Duration) -> Result<Self> {
        let socket = RealtimeSocket::connect(url, heartbeat).await?;
        Ok(Self {
            socket: Arc::new(socket),
            access_token: access_token.to_string(),
        })
    }

    pub fn socket(&self) -> &Arc<RealtimeSocket> {
        &self.socket
    }
}

/// 已加入的频道
struct JoinedChannel {
    socket: Arc<RealtimeSocket>,
    topic: String,
    join_ref: String,
    pump: JoinHandle<()>,
}

impl JoinedChannel {
    fn new(socket: &Arc<RealtimeSocket>, topic: String, join_ref: String, pump: JoinHandle<()>) -> Self {
        Self {
            socket: socket.clone(),
            topic,
            join_ref,
            pump,
        }
    }
}

#[async_trait]
impl ChannelHandle for JoinedChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.pump.abort();
        self.socket.leave(&self.topic, &self.join_ref).await
    }
}

#[async_trait]
impl PresenceChannel for JoinedChannel {
    async fn track(&self, payload: &PresencePayload) -> Result<()> {
        self.socket
            .push(&self.topic, &self.join_ref, PRESENCE, track_payload(payload))
            .await
    }
}

impl Drop for JoinedChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// 非业务帧的公共处理；返回 false 表示频道已失效
fn handle_control_frame(frame: &PhoenixFrame) -> bool {
    if let Some(status) = frame.reply_status() {
        if status != "ok" {
            error!("[Realtime] 频道 {} 返回错误: {}", frame.topic, frame.payload);
        } else {
            debug!("[Realtime] 频道 {} 回复 ok", frame.topic);
        }
        return true;
    }
    if frame.event == PHX_ERROR || frame.event == PHX_CLOSE {
        warn!("[Realtime] 频道 {} 已关闭 ({})", frame.topic, frame.event);
        return false;
    }
    true
}

#[async_trait]
impl RealtimeRemote for RealtimeClient {
    async fn subscribe_messages(&self, conversation_id: &str) -> Result<MessageFeed> {
        let topic = messages_topic(conversation_id);
        let Subscription {
            join_ref,
            mut frames,
        } = self
            .socket
            .join(&topic, messages_join_payload(conversation_id, &self.access_token))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel::<MessageChange>();
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame.event == POSTGRES_CHANGES {
                    if let Some(change) = parse_message_change(&frame.payload) {
                        if tx.send(change).is_err() {
                            break;
                        }
                    }
                } else if !handle_control_frame(&frame) {
                    break;
                }
            }
        });

        Ok(MessageFeed {
            events: rx,
            handle: Arc::new(JoinedChannel::new(&self.socket, topic, join_ref, pump)),
        })
    }

    async fn join_presence(&self, conversation_id: &str) -> Result<PresenceFeed> {
        let topic = presence_topic(conversation_id);
        let Subscription {
            join_ref,
            mut frames,
        } = self
            .socket
            .join(&topic, presence_join_payload(&self.access_token))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel::<Vec<PresencePayload>>();
        let pump = tokio::spawn(async move {
            let mut state = PresenceState::new();
            while let Some(frame) = frames.recv().await {
                match frame.event.as_str() {
                    PRESENCE_STATE => state.sync_state(&frame.payload),
                    PRESENCE_DIFF => state.sync_diff(&frame.payload),
                    _ => {
                        if !handle_control_frame(&frame) {
                            break;
                        }
                        continue;
                    }
                }
                if tx.send(state.snapshot()).is_err() {
                    break;
                }
            }
        });

        Ok(PresenceFeed {
            snapshots: rx,
            channel: Arc::new(JoinedChannel::new(&self.socket, topic, join_ref, pump)),
        })
    }

    async fn subscribe_sidebar(&self, user_id: &str) -> Result<SidebarFeed> {
        let (tx, rx) = mpsc::unbounded_channel::<SidebarChange>();
        let mut handles: Vec<Arc<dyn ChannelHandle>> = Vec::with_capacity(SIDEBAR_TABLES.len());

        for (change, table, event, column) in SIDEBAR_TABLES {
            let topic = table_changes_topic(table, user_id);
            let filter = format!("{}=eq.{}", column, user_id);
            let payload = table_changes_join_payload(table, event, &filter, &self.access_token);
            let Subscription {
                join_ref,
                mut frames,
            } = match self.socket.join(&topic, payload).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    for handle in &handles {
                        if let Err(leave_err) = handle.unsubscribe().await {
                            warn!("[Realtime] 回滚订阅 {} 失败: {}", handle.topic(), leave_err);
                        }
                    }
                    return Err(e);
                }
            };

            let tx = tx.clone();
            let pump = tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    if frame.event == POSTGRES_CHANGES {
                        debug!("[Realtime] {} 有变更", frame.topic);
                        if tx.send(change).is_err() {
                            break;
                        }
                    } else if !handle_control_frame(&frame) {
                        break;
                    }
                }
            });
            handles.push(Arc::new(JoinedChannel::new(&self.socket, topic, join_ref, pump)));
        }

        Ok(SidebarFeed {
            events: rx,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::realtime::protocol::PHX_JOIN;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[test]
    fn error_reply_keeps_channel_but_close_ends_it() {
        let reply = PhoenixFrame::new(
            "realtime:messages:c1",
            "phx_reply",
            json!({ "status": "error", "response": { "reason": "unauthorized" } }),
            Some("1".into()),
        );
        assert!(handle_control_frame(&reply));

        let close = PhoenixFrame::new("realtime:messages:c1", PHX_CLOSE, json!({}), None);
        assert!(!handle_control_frame(&close));
    }

    /// 本地 WebSocket 服务：把收到的帧转给测试，并按测试要求向客户端推送帧
    async fn local_server() -> (
        String,
        mpsc::UnboundedReceiver<PhoenixFrame>,
        mpsc::UnboundedSender<PhoenixFrame>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<PhoenixFrame>();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<PhoenixFrame>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    incoming = read.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let frame: PhoenixFrame = serde_json::from_str(&text).unwrap();
                            let _ = inbound_tx.send(frame);
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(frame) => {
                            let text = serde_json::to_string(&frame).unwrap();
                            if write.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        (url, inbound_rx, outbound_tx)
    }

    fn insert_frame(topic: &str, join_ref: Option<String>, id: &str) -> PhoenixFrame {
        let mut frame = PhoenixFrame::new(
            topic,
            POSTGRES_CHANGES,
            json!({
                "data": {
                    "type": "INSERT",
                    "record": {
                        "id": id,
                        "chat_id": "chat-1",
                        "sender_id": "bob",
                        "content": "hi",
                        "created_at": "2024-05-01T12:00:00+00:00"
                    }
                }
            }),
            None,
        );
        frame.join_ref = join_ref;
        frame
    }

    #[tokio::test]
    async fn unsubscribing_an_older_handle_keeps_the_newer_subscription() {
        let (url, mut inbound, outbound) = local_server().await;
        let client = RealtimeClient::connect(&url, "jwt", Duration::from_secs(60))
            .await
            .unwrap();
        let topic = messages_topic("chat-1");

        let old = client.subscribe_messages("chat-1").await.unwrap();
        let mut new = client.subscribe_messages("chat-1").await.unwrap();
        let first_join = inbound.recv().await.unwrap();
        let second_join = inbound.recv().await.unwrap();
        assert_eq!(first_join.event, PHX_JOIN);
        assert_eq!(second_join.event, PHX_JOIN);
        assert_ne!(first_join.join_ref, second_join.join_ref);

        old.handle.unsubscribe().await.unwrap();
        assert_eq!(client.socket().subscribed_topics(), vec![topic.clone()]);

        outbound
            .send(insert_frame(&topic, first_join.join_ref.clone(), "stale"))
            .unwrap();
        outbound
            .send(insert_frame(&topic, second_join.join_ref.clone(), "m-1"))
            .unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), new.events.recv())
            .await
            .unwrap();
        match change {
            Some(MessageChange::Insert(msg)) => assert_eq!(msg.id, "m-1"),
            other => panic!("unexpected {:?}", other),
        }
        // 旧句柄没有向服务端发送 phx_leave
        assert!(inbound.try_recv().is_err());

        new.handle.unsubscribe().await.unwrap();
        let leave = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leave.event, "phx_leave");
        assert_eq!(leave.join_ref, second_join.join_ref);
        assert!(client.socket().subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn sidebar_joins_three_filtered_feeds() {
        let (url, mut inbound, outbound) = local_server().await;
        let client = RealtimeClient::connect(&url, "jwt", Duration::from_secs(60))
            .await
            .unwrap();

        let mut feed = client.subscribe_sidebar("alice").await.unwrap();
        assert_eq!(feed.handles.len(), 3);

        let mut joins = Vec::new();
        for _ in 0..3 {
            joins.push(inbound.recv().await.unwrap());
        }
        let filters: Vec<(String, String, String)> = joins
            .iter()
            .map(|frame| {
                let change = &frame.payload["config"]["postgres_changes"][0];
                (
                    change["table"].as_str().unwrap_or_default().to_string(),
                    change["event"].as_str().unwrap_or_default().to_string(),
                    change["filter"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            filters,
            vec![
                ("friend_requests".into(), "*".into(), "receiver_id=eq.alice".into()),
                ("friendships".into(), "*".into(), "user_id=eq.alice".into()),
                ("chat_members".into(), "INSERT".into(), "user_id=eq.alice".into()),
            ]
        );

        let members = &joins[2];
        let mut frame = PhoenixFrame::new(
            &members.topic,
            POSTGRES_CHANGES,
            json!({ "data": { "type": "INSERT", "record": { "chat_id": "c9", "user_id": "alice" } } }),
            None,
        );
        frame.join_ref = members.join_ref.clone();
        outbound.send(frame).unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), feed.events.recv())
            .await
            .unwrap();
        assert_eq!(change, Some(SidebarChange::Memberships));
    }
}
