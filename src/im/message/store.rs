//! 本地消息存储（当前打开会话的内存消息列表）
//!
//! 以消息 ID 为键的有序映射：`records` 负责 O(1) 去重与查找，`order` 保留追加顺序。
//! 切换会话时整个存储被丢弃，不做跨会话缓存。

use crate::im::message::models::{Message, MessageChange};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// 会话、事件泵与清理任务共享的存储
pub type SharedStore = Arc<Mutex<MessageStore>>;

/// 加锁；持锁方 panic 后仍返回内部数据（存储的每个操作都是完整的）
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, MessageStore> {
    match store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    records: HashMap<String, Message>,
    order: Vec<String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次拉取：替换全部内容，跳过已过期的消息
    pub fn load_initial(&mut self, messages: Vec<Message>, now: DateTime<Utc>) {
        self.records.clear();
        self.order.clear();

        let total = messages.len();
        for msg in messages.into_iter().filter(|m| !m.is_expired(now)) {
            self.insert(msg);
        }
        debug!(
            "[MessageStore] 初始加载 {} 条消息，保留 {} 条",
            total,
            self.order.len()
        );
    }

    /// 插入消息；ID 已存在时丢弃（幂等合并），返回是否真正插入
    pub fn insert(&mut self, msg: Message) -> bool {
        if self.records.contains_key(&msg.id) {
            debug!("[MessageStore] 重复消息 {}，忽略", msg.id);
            return false;
        }
        self.order.push(msg.id.clone());
        self.records.insert(msg.id.clone(), msg);
        true
    }

    /// 替换同 ID 的记录；不存在时忽略（可能已在本地过期）
    pub fn update(&mut self, msg: Message) -> bool {
        match self.records.get_mut(&msg.id) {
            Some(slot) => {
                *slot = msg;
                true
            }
            None => {
                debug!("[MessageStore] 更新未知消息 {}，忽略", msg.id);
                false
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if self.records.remove(id).is_none() {
            return false;
        }
        self.order.retain(|x| x != id);
        true
    }

    pub fn apply(&mut self, change: MessageChange) -> bool {
        match change {
            MessageChange::Insert(msg) => self.insert(msg),
            MessageChange::Update(msg) => self.update(msg),
            MessageChange::Delete { id } => self.remove(&id),
        }
    }

    /// 删除所有 `vanish_at <= now` 的消息，返回被删除的 ID
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|m| m.is_expired(now)))
            .cloned()
            .collect();

        if !expired.is_empty() {
            for id in &expired {
                self.records.remove(id);
            }
            self.order.retain(|id| self.records.contains_key(id));
        }
        expired
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.records.get_mut(id)
    }

    /// 被引用回复的消息（若仍在本地）
    pub fn reply_target(&self, msg: &Message) -> Option<&Message> {
        msg.reply_to.as_deref().and_then(|id| self.records.get(id))
    }

    /// 按展示顺序返回消息快照
    pub fn messages(&self) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
