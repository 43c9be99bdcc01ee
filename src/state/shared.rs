//! 共享内存（黑板 + 事件日志）
//!
//! Agent 之间不直接耦合：通过会话作用域的黑板（`shared:{id}:{key}`）读写彼此的产出，
//! 通过有界事件日志（`events:{id}`）互相发信号。事件按时间戳排序，超出容量时丢弃最旧的。
//!
//! 编排器使用的键：
//! - `agent_output:{agent_type}`：该 Agent 最近一次成功响应的内容
//! - `task_output:{task_id}`：单个任务的成功响应内容

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;
use crate::core::StateError;
use crate::state::conversation::now_ms;
use crate::state::locks::KeyedLocks;
use crate::state::store::{events_key, shared_key, StateStore, StateStoreExt};

/// 默认事件日志容量
pub const DEFAULT_MAX_EVENTS: usize = 100;

/// 黑板键前缀：Agent 最近一次产出
pub const AGENT_OUTPUT_PREFIX: &str = "agent_output:";
/// 黑板键前缀：单个任务产出
pub const TASK_OUTPUT_PREFIX: &str = "task_output:";

pub fn agent_output_key(agent: AgentType) -> String {
    format!("{}{}", AGENT_OUTPUT_PREFIX, agent)
}

pub fn task_output_key(task_id: &str) -> String {
    format!("{}{}", TASK_OUTPUT_PREFIX, task_id)
}

/// 共享事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedMemoryEvent {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(default)]
    pub source_agent: Option<AgentType>,
}

/// 跨 Agent 黑板
pub struct SharedMemory {
    store: Arc<dyn StateStore>,
    locks: KeyedLocks,
    max_events: usize,
    ttl: Option<Duration>,
}

impl SharedMemory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            max_events: DEFAULT_MAX_EVENTS,
            ttl: None,
        }
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// 写入黑板；返回值表示内容是否发生变化（新键或值不同）
    pub async fn set<T>(&self, conversation_id: &str, key: &str, value: &T) -> Result<bool, StateError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let full = shared_key(conversation_id, key);
        let raw = serde_json::to_string(value).map_err(|e| StateError::Serialization {
            key: full.clone(),
            message: e.to_string(),
        })?;
        let _guard = self.locks.acquire(&full).await;
        let previous = self.store.get_raw(&full).await.unwrap_or(None);
        let changed = previous.as_deref() != Some(raw.as_str());
        self.store.set_raw(&full, raw, self.ttl).await?;
        tracing::debug!(key = %full, changed, "Shared memory write");
        Ok(changed)
    }

    pub async fn get<T>(&self, conversation_id: &str, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        self.store.get(&shared_key(conversation_id, key)).await
    }

    pub async fn remove(&self, conversation_id: &str, key: &str) -> bool {
        self.store
            .remove(&shared_key(conversation_id, key))
            .await
            .unwrap_or(false)
    }

    pub async fn exists(&self, conversation_id: &str, key: &str) -> bool {
        self.store
            .exists(&shared_key(conversation_id, key))
            .await
            .unwrap_or(false)
    }

    /// 列出会话黑板上的键（去掉 `shared:{id}:` 前缀）
    pub async fn keys(&self, conversation_id: &str) -> Vec<String> {
        let prefix = shared_key(conversation_id, "");
        match self.store.keys(&format!("{}*", prefix)).await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Failed to list shared keys");
                Vec::new()
            }
        }
    }

    /// 追加事件；超出容量时丢弃最旧的事件
    pub async fn publish_event(
        &self,
        conversation_id: &str,
        event_type: &str,
        data: Value,
        source_agent: Option<AgentType>,
    ) -> SharedMemoryEvent {
        let event = SharedMemoryEvent {
            event_id: format!("evt_{}", uuid::Uuid::new_v4()),
            event_type: event_type.to_string(),
            data,
            timestamp: now_ms(),
            source_agent,
        };
        let key = events_key(conversation_id);
        let _guard = self.locks.acquire(&key).await;
        let mut events: Vec<SharedMemoryEvent> = self.store.get(&key).await.unwrap_or_default();
        events.push(event.clone());
        // 稳定排序：同一毫秒内保持发布顺序
        events.sort_by_key(|e| e.timestamp);
        if events.len() > self.max_events {
            let excess = events.len() - self.max_events;
            events.drain(..excess);
        }
        if let Err(e) = self.store.set(&key, &events, self.ttl).await {
            tracing::warn!(conversation_id, error = %e, "Failed to persist event log");
        }
        event
    }

    /// 最近的 `max_events` 个事件，最新的在前
    pub async fn get_events(&self, conversation_id: &str, max_events: usize) -> Vec<SharedMemoryEvent> {
        let mut events: Vec<SharedMemoryEvent> = self
            .store
            .get(&events_key(conversation_id))
            .await
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        events.into_iter().rev().take(max_events).collect()
    }

    /// 删除会话的黑板键与事件日志（会话结束时调用）
    pub async fn clear(&self, conversation_id: &str) -> Result<usize, StateError> {
        let prefix = shared_key(conversation_id, "");
        let mut removed = self.store.clear(&format!("{}*", prefix)).await?;
        if self.store.remove(&events_key(conversation_id)).await? {
            removed += 1;
        }
        tracing::info!(conversation_id, removed, "Shared memory cleared");
        Ok(removed)
    }

    /// 为某个 Agent 创建会话作用域的句柄
    pub fn handle(self: &Arc<Self>, conversation_id: &str, agent: Option<AgentType>) -> SharedMemoryHandle {
        SharedMemoryHandle {
            memory: Arc::clone(self),
            conversation_id: conversation_id.to_string(),
            agent,
            changed_writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Agent 看到的共享内存：绑定会话与来源 Agent，并统计本次派发中产生变化的写入
#[derive(Clone)]
pub struct SharedMemoryHandle {
    memory: Arc<SharedMemory>,
    conversation_id: String,
    agent: Option<AgentType>,
    changed_writes: Arc<AtomicUsize>,
}

impl SharedMemoryHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn agent(&self) -> Option<AgentType> {
        self.agent
    }

    /// 同一会话下换一个来源 Agent，共享写入计数
    pub fn for_agent(&self, agent: AgentType) -> Self {
        Self {
            agent: Some(agent),
            ..self.clone()
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T) -> Result<bool, StateError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let changed = self.memory.set(&self.conversation_id, key, value).await?;
        if changed {
            self.changed_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        self.memory.get(&self.conversation_id, key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.memory.exists(&self.conversation_id, key).await
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.memory.remove(&self.conversation_id, key).await
    }

    pub async fn keys(&self) -> Vec<String> {
        self.memory.keys(&self.conversation_id).await
    }

    /// 读取其它 Agent 的最近产出
    pub async fn peer_output(&self, agent: AgentType) -> Option<String> {
        self.get(&agent_output_key(agent)).await
    }

    pub async fn publish(&self, event_type: &str, data: Value) -> SharedMemoryEvent {
        self.memory
            .publish_event(&self.conversation_id, event_type, data, self.agent)
            .await
    }

    pub async fn events(&self, max_events: usize) -> Vec<SharedMemoryEvent> {
        self.memory.get_events(&self.conversation_id, max_events).await
    }

    /// 本句柄（及其派生句柄）产生变化的写入次数
    pub fn changed_writes(&self) -> usize {
        self.changed_writes.load(Ordering::SeqCst)
    }
}
