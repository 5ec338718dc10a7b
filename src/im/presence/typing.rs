//! 输入状态上报
//!
//! 本地只有 `Idle` / `Typing` 两个状态，只在状态切换时通过 presence 频道发布。
//! 每次输入都会重置防抖定时器，定时器到期或输入被清空时回到 `Idle`。
//! 定时器带有代号，被后续输入取代的定时器即使已经到期也不会发布 `Idle`。

use crate::im::presence::{PresencePayload, TypingUser};
use crate::im::remote::PresenceChannel;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// 默认防抖时长
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Typing,
}

struct ReporterInner {
    channel: Arc<dyn PresenceChannel>,
    user_id: String,
    username: String,
    // 发布期间持有锁，保证发布顺序与状态切换顺序一致
    state: Mutex<TypingState>,
    // 每次输入或清空时递增
    generation: AtomicU64,
}

impl ReporterInner {
    fn payload(&self, is_typing: bool) -> PresencePayload {
        PresencePayload {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            is_typing,
        }
    }

    fn supersede(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn transition(&self, next: TypingState) -> Result<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, next).await
    }

    /// 定时器到期；代号已过时则什么都不做
    async fn expire(&self, generation: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("[Typing] 定时器 #{} 已被新的输入取代", generation);
            return Ok(());
        }
        self.apply(&mut state, TypingState::Idle).await
    }

    async fn apply(&self, state: &mut TypingState, next: TypingState) -> Result<()> {
        if *state == next {
            return Ok(());
        }
        let payload = self.payload(next == TypingState::Typing);
        self.channel.track(&payload).await?;
        debug!("[Typing] {} 状态切换 {:?} -> {:?}", self.user_id, *state, next);
        *state = next;
        Ok(())
    }
}

/// 本地输入状态上报器
///
/// 防抖定时器是上报器自己持有的任务，随上报器一起释放。
pub struct TypingReporter {
    inner: Arc<ReporterInner>,
    debounce: Duration,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TypingReporter {
    pub fn new(
        channel: Arc<dyn PresenceChannel>,
        user_id: &str,
        username: &str,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                channel,
                user_id: user_id.to_string(),
                username: username.to_string(),
                state: Mutex::new(TypingState::Idle),
                generation: AtomicU64::new(0),
            }),
            debounce,
            timer: std::sync::Mutex::new(None),
        }
    }

    /// 发布当前状态（加入频道后的首次 track）
    pub async fn announce(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        let payload = self.inner.payload(*state == TypingState::Typing);
        self.inner.channel.track(&payload).await
    }

    /// 输入框内容变化
    pub async fn on_input(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.clear().await;
        }
        // 先让旧定时器失效，再发布 Typing
        let generation = self.inner.supersede();
        self.cancel_timer();
        self.inner.transition(TypingState::Typing).await?;
        self.start_timer(generation);
        Ok(())
    }

    /// 输入被清空或消息已发送
    pub async fn clear(&self) -> Result<()> {
        self.inner.supersede();
        self.cancel_timer();
        self.inner.transition(TypingState::Idle).await
    }

    pub async fn state(&self) -> TypingState {
        *self.inner.state.lock().await
    }

    /// 停止防抖定时器（不再发布任何状态）
    pub fn shutdown(&self) {
        self.cancel_timer();
    }

    fn start_timer(&self, generation: u64) {
        let inner = self.inner.clone();
        let deadline = Instant::now() + self.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(e) = inner.expire(generation).await {
                error!("[Typing] 发布空闲状态失败: {}", e);
            }
        });

        let mut slot = match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    fn cancel_timer(&self) {
        let mut slot = match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = slot.take() {
            old.abort();
        }
    }
}

impl Drop for TypingReporter {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// 从 presence 快照中计算正在输入的对端
///
/// 同一用户出现多次时以最后一条为准；排除自己与未在输入的用户。
pub fn typing_peers(snapshot: &[PresencePayload], me: &str) -> Vec<TypingUser> {
    let mut latest: Vec<&PresencePayload> = Vec::new();
    for entry in snapshot {
        match latest.iter_mut().find(|p| p.user_id == entry.user_id) {
            Some(slot) => *slot = entry,
            None => latest.push(entry),
        }
    }

    latest
        .into_iter()
        .filter(|p| p.is_typing && p.user_id != me)
        .map(|p| TypingUser {
            id: p.user_id.clone(),
            username: p.username.clone(),
        })
        .collect()
}

/// 显示名：邮箱 @ 之前的部分
pub fn username_from_email(email: Option<&str>) -> String {
    email
        .and_then(|e| e.split('@').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("User")
        .to_string()
}
