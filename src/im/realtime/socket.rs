//! 实时推送的 WebSocket 连接
//!
//! 一个连接上复用多个频道：读取任务按 topic 把帧分发给订阅者，心跳任务定期发送 heartbeat。
//! 同一 topic 重新加入时旧订阅立即失效，路由只认最近一次加入的 join_ref。

use crate::im::realtime::protocol::{PhoenixFrame, PHOENIX_TOPIC, PHX_JOIN, PHX_LEAVE};
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 一次加入对应的路由
struct Route {
    join_ref: String,
    tx: mpsc::UnboundedSender<PhoenixFrame>,
}

type Routes = Arc<std::sync::Mutex<HashMap<String, Route>>>;

/// 加入频道后得到的订阅
pub struct Subscription {
    pub join_ref: String,
    pub frames: mpsc::UnboundedReceiver<PhoenixFrame>,
}

/// 默认心跳间隔
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

fn lock_routes(routes: &Routes) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
    match routes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct RealtimeSocket {
    writer: Arc<Mutex<WsWriter>>,
    routes: Routes,
    next_ref: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeSocket {
    /// 建立连接并启动读取与心跳任务
    pub async fn connect(url: &str, heartbeat: Duration) -> Result<Self> {
        info!("[Realtime] 🔗 连接实时服务");
        let (ws_stream, response) = connect_async(url)
            .await
            .context("WebSocket 连接失败")?;
        info!("[Realtime] ✅ WebSocket 连接成功, 状态: {}", response.status());

        let (write, read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));
        let routes: Routes = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let next_ref = Arc::new(AtomicU64::new(1));

        let reader_task = {
            let routes = routes.clone();
            tokio::spawn(async move {
                handle_frames(read, routes).await;
            })
        };

        let heartbeat_task = {
            let writer = writer.clone();
            let next_ref = next_ref.clone();
            tokio::spawn(async move {
                let mut ticker = interval(heartbeat);
                // 第一次 tick 立即完成，跳过
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let reference = next_ref.fetch_add(1, Ordering::Relaxed).to_string();
                    let frame = PhoenixFrame::heartbeat(reference);
                    if let Err(e) = send_frame(&writer, &frame).await {
                        error!("[Realtime] 💔 心跳发送失败: {}", e);
                        break;
                    }
                }
            })
        };

        Ok(Self {
            writer,
            routes,
            next_ref,
            tasks: vec![reader_task, heartbeat_task],
        })
    }

    fn make_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// 加入频道，返回这一次加入的 join_ref 与帧接收端
    pub async fn join(&self, topic: &str, payload: Value) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let join_ref = self.make_ref();
        let route = Route {
            join_ref: join_ref.clone(),
            tx,
        };
        if let Some(old) = lock_routes(&self.routes).insert(topic.to_string(), route) {
            warn!(
                "[Realtime] topic {} 重新加入，旧订阅 (join_ref={}) 失效",
                topic, old.join_ref
            );
        }

        let mut frame = PhoenixFrame::new(topic, PHX_JOIN, payload, Some(join_ref.clone()));
        frame.join_ref = Some(join_ref.clone());
        if let Err(e) = send_frame(&self.writer, &frame).await {
            release_route(&self.routes, topic, &join_ref);
            return Err(e);
        }
        info!("[Realtime] 📡 加入频道 {} (join_ref={})", topic, join_ref);
        Ok(Subscription {
            join_ref,
            frames: rx,
        })
    }

    /// 在已加入的频道上发送事件
    pub async fn push(&self, topic: &str, join_ref: &str, event: &str, payload: Value) -> Result<()> {
        let mut frame = PhoenixFrame::new(topic, event, payload, Some(self.make_ref()));
        frame.join_ref = Some(join_ref.to_string());
        send_frame(&self.writer, &frame).await
    }

    /// 离开频道
    ///
    /// 只有当前路由仍属于 `join_ref` 时才移除路由并发送 `phx_leave`；
    /// 该 topic 已被更新的加入接管时什么都不做。
    pub async fn leave(&self, topic: &str, join_ref: &str) -> Result<()> {
        if !release_route(&self.routes, topic, join_ref) {
            debug!(
                "[Realtime] {} 已由新的订阅接管，跳过 phx_leave (join_ref={})",
                topic, join_ref
            );
            return Ok(());
        }
        let mut frame = PhoenixFrame::new(topic, PHX_LEAVE, serde_json::json!({}), Some(self.make_ref()));
        frame.join_ref = Some(join_ref.to_string());
        send_frame(&self.writer, &frame).await?;
        info!("[Realtime] 👋 离开频道 {}", topic);
        Ok(())
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        lock_routes(&self.routes).keys().cloned().collect()
    }

    /// 关闭连接
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(WsMessage::Close(None)).await {
            debug!("[Realtime] 关闭连接时出错: {}", e);
        }
    }
}

impl Drop for RealtimeSocket {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn send_frame(writer: &Mutex<WsWriter>, frame: &PhoenixFrame) -> Result<()> {
    let text = serde_json::to_string(frame).context("序列化帧失败")?;
    debug!("[Realtime] 📤 {}", text);
    let mut w = writer.lock().await;
    w.send(WsMessage::Text(text))
        .await
        .context("发送 WebSocket 帧失败")
}

/// 读取循环：把文本帧按 topic 分发
async fn handle_frames(mut read: WsReader, routes: Routes) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<PhoenixFrame>(&text) {
                Ok(frame) => route_frame(&routes, frame),
                Err(e) => warn!("[Realtime] 无法解析帧: {}, 原始数据: {}", e, text),
            },
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Realtime] 👋 连接关闭: {:?}", frame);
                break;
            }
            Err(e) => {
                error!("[Realtime] WebSocket 错误: {}", e);
                break;
            }
            _ => {}
        }
    }
    // 连接结束后清空路由，订阅方的接收端随之关闭
    lock_routes(&routes).clear();
}

/// 路由仍属于 `join_ref` 时移除并返回 true
fn release_route(routes: &Routes, topic: &str, join_ref: &str) -> bool {
    let mut routes = lock_routes(routes);
    match routes.get(topic) {
        Some(route) if route.join_ref == join_ref => {
            routes.remove(topic);
            true
        }
        _ => false,
    }
}

fn route_frame(routes: &Routes, frame: PhoenixFrame) {
    if frame.topic == PHOENIX_TOPIC {
        return;
    }
    let mut routes = lock_routes(routes);
    let Some(route) = routes.get(&frame.topic) else {
        debug!("[Realtime] 未订阅的 topic {}，丢弃 {}", frame.topic, frame.event);
        return;
    };
    // 旧的加入留下的帧（回复、关闭、迟到的推送）
    if let Some(join_ref) = frame.join_ref.as_deref() {
        if join_ref != route.join_ref {
            debug!(
                "[Realtime] {} 的帧属于已失效的 join_ref={}，丢弃 {}",
                frame.topic, join_ref, frame.event
            );
            return;
        }
    }
    let topic = frame.topic.clone();
    if route.tx.send(frame).is_err() {
        routes.remove(&topic);
    }
}
