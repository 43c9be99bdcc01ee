//! 状态存储抽象
//!
//! 所有状态组件（会话 / Agent 工作状态 / 共享内存）都建立在 `StateStore` 之上。
//! 后端只处理序列化后的字符串；类型化的 get/set 由 `StateStoreExt` 统一提供。
//!
//! 键空间约定（供运维与调试查看）：
//! - `conversation:{id}`
//! - `agent:{id}:{type}`
//! - `shared:{id}:{key}`
//! - `events:{id}`

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::StateError;

/// 可插拔的键值存储后端
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取原始值；不存在或已过期返回 None
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StateError>;

    /// 写入原始值，`expiration` 为 None 表示永不过期
    async fn set_raw(
        &self,
        key: &str,
        value: String,
        expiration: Option<Duration>,
    ) -> Result<(), StateError>;

    /// 删除键，返回键之前是否存在
    async fn remove(&self, key: &str) -> Result<bool, StateError>;

    async fn exists(&self, key: &str) -> Result<bool, StateError>;

    /// 按 glob 模式（`*`、`?`）枚举键，整串匹配
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError>;

    /// 删除所有匹配模式的键，返回删除数量
    async fn clear(&self, pattern: &str) -> Result<usize, StateError>;
}

/// 类型化访问：get 失败（后端错误 / 反序列化错误）一律视为未命中
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let raw = match self.get_raw(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "State read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = StateError::Deserialization {
                    key: key.to_string(),
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Stale or corrupt state, treating as miss");
                None
            }
        }
    }

    async fn set<T>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> Result<(), StateError>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value).map_err(|e| StateError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.set_raw(key, raw, expiration).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// 将 glob 模式翻译为整串匹配的正则：`*` -> `.*`，`?` -> `.`，其余字符转义
pub fn glob_to_regex(pattern: &str) -> Result<Regex, StateError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|_| StateError::InvalidPattern(pattern.to_string()))
}

pub fn conversation_key(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn agent_key(conversation_id: &str, agent_type: &str) -> String {
    format!("agent:{}:{}", conversation_id, agent_type)
}

pub fn shared_key(conversation_id: &str, key: &str) -> String {
    format!("shared:{}:{}", conversation_id, key)
}

pub fn events_key(conversation_id: &str) -> String {
    format!("events:{}", conversation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_matches_whole_key() {
        let re = glob_to_regex("conversation:*").unwrap();
        assert!(re.is_match("conversation:a"));
        assert!(re.is_match("conversation:"));
        assert!(!re.is_match("agent:conversation:a"));
        assert!(!re.is_match("xconversation:a"));
    }

    #[test]
    fn test_glob_question_mark_is_single_char() {
        let re = glob_to_regex("agent:?:x").unwrap();
        assert!(re.is_match("agent:a:x"));
        assert!(!re.is_match("agent:ab:x"));
        assert!(!re.is_match("agent::x"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("shared:a.b:(k)").unwrap();
        assert!(re.is_match("shared:a.b:(k)"));
        assert!(!re.is_match("shared:aXb:(k)"));
    }

    /// 所有读写都失败的后端
    struct UnreachableStore;

    #[async_trait]
    impl StateStore for UnreachableStore {
        async fn get_raw(&self, _key: &str) -> Result<Option<String>, StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }

        async fn set_raw(
            &self,
            _key: &str,
            _value: String,
            _expiration: Option<Duration>,
        ) -> Result<(), StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<bool, StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }

        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }

        async fn clear(&self, _pattern: &str) -> Result<usize, StateError> {
            Err(StateError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_reads_as_miss_and_write_reports_error() {
        let store = UnreachableStore;
        assert_eq!(store.get::<String>("conversation:c1").await, None);
        let err = store.set("conversation:c1", &"x", None).await.unwrap_err();
        assert!(matches!(err, StateError::Backend(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_conversation_manager_degrades_on_backend_failure() {
        use crate::state::ConversationStateManager;
        use std::sync::Arc;

        let mgr = ConversationStateManager::new(Arc::new(UnreachableStore));
        // 读失败按未命中处理，写失败只记日志
        let state = mgr.get_or_create("c1").await;
        assert_eq!(state.conversation_id, "c1");
        assert!(mgr.get("c1").await.is_none());
        assert!(!mgr.delete("c1").await);
        assert!(mgr.list_active().await.is_empty());
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(conversation_key("c1"), "conversation:c1");
        assert_eq!(agent_key("c1", "compliance"), "agent:c1:compliance");
        assert_eq!(shared_key("c1", "k"), "shared:c1:k");
        assert_eq!(events_key("c1"), "events:c1");
    }
}
