//! presence 状态同步
//!
//! `presence_state` 给出完整状态，`presence_diff` 给出增量（joins / leaves）。
//! 每个 key 下可能有多条 meta（同一用户的多个连接），以 `phx_ref` 区分。

use crate::im::presence::PresencePayload;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct PresenceState {
    entries: BTreeMap<String, Vec<Value>>,
}

fn metas(entry: &Value) -> Vec<Value> {
    entry
        .get("metas")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn phx_ref(meta: &Value) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用服务端的完整状态替换本地状态
    pub fn sync_state(&mut self, state: &Value) {
        self.entries.clear();
        if let Some(map) = state.as_object() {
            for (key, entry) in map {
                self.entries.insert(key.clone(), metas(entry));
            }
        }
    }

    pub fn sync_diff(&mut self, diff: &Value) {
        if let Some(joins) = diff.get("joins").and_then(Value::as_object) {
            self.apply_joins(joins);
        }
        if let Some(leaves) = diff.get("leaves").and_then(Value::as_object) {
            self.apply_leaves(leaves);
        }
    }

    fn apply_joins(&mut self, joins: &Map<String, Value>) {
        for (key, entry) in joins {
            let current = self.entries.entry(key.clone()).or_default();
            for meta in metas(entry) {
                // 同一个 phx_ref 重复 join 视为更新
                let existing = phx_ref(&meta)
                    .and_then(|r| current.iter().position(|m| phx_ref(m) == Some(r)));
                match existing {
                    Some(idx) => current[idx] = meta,
                    None => current.push(meta),
                }
            }
        }
    }

    fn apply_leaves(&mut self, leaves: &Map<String, Value>) {
        for (key, entry) in leaves {
            let left: Vec<String> = metas(entry)
                .iter()
                .filter_map(|m| phx_ref(m).map(str::to_string))
                .collect();
            if let Some(current) = self.entries.get_mut(key) {
                current.retain(|m| !phx_ref(m).is_some_and(|r| left.iter().any(|l| l == r)));
                if current.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// 展开为 payload 列表；无法解析的 meta 被跳过
    pub fn snapshot(&self) -> Vec<PresencePayload> {
        let snapshot: Vec<PresencePayload> = self
            .entries
            .values()
            .flatten()
            .filter_map(|meta| serde_json::from_value(meta.clone()).ok())
            .collect();
        debug!("[Presence] 当前在线条目 {} 个", snapshot.len());
        snapshot
    }
}
