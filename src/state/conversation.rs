//! 会话状态管理
//!
//! 每个会话一条记录（`conversation:{id}`）：历史消息、变量、生命周期状态。
//! 所有修改都是「读-改-写」，按会话 ID 加锁串行化；不同会话互不阻塞。
//! 存储读写失败只记录日志，不向调用方抛出。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;
use crate::orchestrator::OrchestratedResponse;
use crate::state::locks::KeyedLocks;
use crate::state::store::{conversation_key, StateStore, StateStoreExt};

/// 默认历史消息上限
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条历史消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 毫秒时间戳
    pub timestamp: i64,
    /// 产生该回复的 Agent（仅 Assistant 消息）
    #[serde(default)]
    pub agent_type: Option<AgentType>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_ms(),
            agent_type: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_agent(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// 会话生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    Active,
    Paused,
    Completed,
    Expired,
    Error,
}

/// 会话状态；仅由 `ConversationStateManager` 修改，只能显式删除
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub status: ConversationStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub active_agent_type: Option<AgentType>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
            created_at: now,
            last_activity_at: now,
            status: ConversationStatus::Active,
            messages: Vec::new(),
            variables: HashMap::new(),
            active_agent_type: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity_at = now_ms().max(self.last_activity_at);
    }

    /// 超出上限时按时间戳保留最近的 N 条，结果保持时间升序
    fn trim_messages(&mut self, max_messages: usize) {
        if self.messages.len() <= max_messages {
            return;
        }
        self.messages.sort_by_key(|m| m.timestamp);
        let excess = self.messages.len() - max_messages;
        self.messages.drain(..excess);
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            conversation_id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            message_count: self.messages.len(),
            active_agent_type: self.active_agent_type,
        }
    }
}

/// 活跃会话的轻量摘要（运维查看用）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub created_at: i64,
    pub last_activity_at: i64,
    pub message_count: usize,
    pub active_agent_type: Option<AgentType>,
}

/// 会话状态管理器
pub struct ConversationStateManager {
    store: Arc<dyn StateStore>,
    locks: KeyedLocks,
    max_messages: usize,
    ttl: Option<Duration>,
}

impl ConversationStateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
            ttl: None,
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// 只读取，不存在时返回 None
    pub async fn get(&self, conversation_id: &str) -> Option<ConversationState> {
        self.store.get(&conversation_key(conversation_id)).await
    }

    /// 获取或创建（Active）；同一 ID 并发调用只会创建一次
    pub async fn get_or_create(&self, conversation_id: &str) -> ConversationState {
        let key = conversation_key(conversation_id);
        let _guard = self.locks.acquire(&key).await;
        self.load_or_create_locked(&key, conversation_id).await
    }

    /// 持锁期间调用：读取现有状态，不存在则创建并写回
    async fn load_or_create_locked(&self, key: &str, conversation_id: &str) -> ConversationState {
        if let Some(state) = self.store.get::<ConversationState>(key).await {
            return state;
        }
        let state = ConversationState::new(conversation_id);
        self.persist(key, &state).await;
        tracing::info!(conversation_id, "Conversation created");
        state
    }

    async fn persist(&self, key: &str, state: &ConversationState) {
        if let Err(e) = self.store.set(key, state, self.ttl).await {
            tracing::warn!(key, error = %e, "Failed to persist conversation state");
        }
    }

    /// 在会话锁内执行一次修改并写回；统一刷新 last_activity_at
    async fn update<F, R>(&self, conversation_id: &str, f: F) -> R
    where
        F: FnOnce(&mut ConversationState) -> R,
    {
        let key = conversation_key(conversation_id);
        let _guard = self.locks.acquire(&key).await;
        let mut state = self.load_or_create_locked(&key, conversation_id).await;
        let out = f(&mut state);
        state.touch();
        self.persist(&key, &state).await;
        out
    }

    /// 整体覆盖保存
    pub async fn save(&self, state: &ConversationState) {
        let key = conversation_key(&state.conversation_id);
        let _guard = self.locks.acquire(&key).await;
        let mut state = state.clone();
        state.touch();
        self.persist(&key, &state).await;
    }

    /// 追加消息；超过上限时裁剪为最近的 N 条
    pub async fn add_message(&self, conversation_id: &str, message: Message) {
        let max = self.max_messages;
        self.update(conversation_id, |s| {
            s.messages.push(message);
            s.trim_messages(max);
        })
        .await
    }

    /// 最近的 `limit` 条消息（时间升序）；None 表示全部
    pub async fn get_messages(&self, conversation_id: &str, limit: Option<usize>) -> Vec<Message> {
        let Some(state) = self.get(conversation_id).await else {
            return Vec::new();
        };
        let messages = state.messages;
        match limit {
            Some(l) if l < messages.len() => messages[messages.len() - l..].to_vec(),
            _ => messages,
        }
    }

    pub async fn set_variable<T>(&self, conversation_id: &str, name: &str, value: &T)
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(conversation_id, name, error = %e, "Variable not serializable");
                return;
            }
        };
        self.update(conversation_id, |s| {
            s.variables.insert(name.to_string(), value);
        })
        .await
    }

    pub async fn get_variable<T>(&self, conversation_id: &str, name: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let state = self.get(conversation_id).await?;
        let value = state.variables.get(name)?.clone();
        serde_json::from_value(value).ok()
    }

    pub async fn set_status(&self, conversation_id: &str, status: ConversationStatus) {
        self.update(conversation_id, |s| s.status = status).await;
        tracing::info!(conversation_id, ?status, "Conversation status changed");
    }

    /// 绑定发起会话的用户
    pub async fn set_user(&self, conversation_id: &str, user_id: &str) {
        self.update(conversation_id, |s| s.user_id = Some(user_id.to_string()))
            .await
    }

    pub async fn set_active_agent(&self, conversation_id: &str, agent_type: Option<AgentType>) {
        self.update(conversation_id, |s| s.active_agent_type = agent_type)
            .await
    }

    /// 记录一轮交互：用户消息 + 编排结果（取消的轮次只记录用户消息）
    pub async fn record_exchange(
        &self,
        conversation_id: &str,
        user_message: &str,
        response: &OrchestratedResponse,
    ) {
        let max = self.max_messages;
        let user = Message::user(user_message);
        let reply = if response.cancelled {
            None
        } else {
            let mut m = Message::assistant(response.final_response.clone());
            if let Some(last) = response.agents_invoked.last() {
                m = m.with_agent(*last);
            }
            // 保证回复排在用户消息之后
            Some(m.at(user.timestamp.max(now_ms())))
        };
        let last_agent = response.agents_invoked.last().copied();
        self.update(conversation_id, move |s| {
            s.messages.push(user);
            if let Some(reply) = reply {
                s.messages.push(reply);
            }
            s.trim_messages(max);
            if last_agent.is_some() {
                s.active_agent_type = last_agent;
            }
        })
        .await
    }

    /// 所有 Active 会话的摘要，按最近活跃时间倒序
    pub async fn list_active(&self) -> Vec<ConversationSummary> {
        let keys = match self.store.keys("conversation:*").await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to enumerate conversations");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for key in keys {
            if let Some(state) = self.store.get::<ConversationState>(&key).await {
                if state.status == ConversationStatus::Active {
                    out.push(state.summary());
                }
            }
        }
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        out
    }

    /// 显式删除会话
    pub async fn delete(&self, conversation_id: &str) -> bool {
        let key = conversation_key(conversation_id);
        let _guard = self.locks.acquire(&key).await;
        match self.store.remove(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Failed to delete conversation");
                false
            }
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
