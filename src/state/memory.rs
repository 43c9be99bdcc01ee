//! 内存状态存储
//!
//! 值表与键索引放在同一把锁下，过期淘汰时两者同时删除：
//! 不会出现 `exists` 为 false 而 `keys` 仍列出该键（或反之）的窗口。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::StateError;
use crate::state::store::{glob_to_regex, StateStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// 键索引（有序，便于稳定枚举）
    index: BTreeSet<String>,
}

impl Inner {
    fn evict(&mut self, key: &str) -> bool {
        self.index.remove(key);
        self.entries.remove(key).is_some()
    }
}

/// 进程内的 `StateStore` 实现，可被多个并发派发的任务共享
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的条目数
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 清扫所有已过期条目，返回清扫数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.evict(key);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Purged expired state entries");
        }
        expired.len()
    }

    /// 启动后台清扫任务，token 取消后退出
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.purge_expired().await;
                    }
                }
            }
            tracing::debug!("State sweeper stopped");
        })
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StateError> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // 已过期：升级为写锁后再确认一次，避免删掉并发写入的新值
        let mut inner = self.inner.write().await;
        if inner
            .entries
            .get(key)
            .map(|e| e.is_expired(Instant::now()))
            .unwrap_or(false)
        {
            inner.evict(key);
            tracing::debug!(key, "Evicted expired entry");
        }
        Ok(None)
    }

    async fn set_raw(
        &self,
        key: &str,
        value: String,
        expiration: Option<Duration>,
    ) -> Result<(), StateError> {
        let expires_at = expiration.map(|ttl| Instant::now() + ttl);
        let mut inner = self.inner.write().await;
        inner
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        inner.index.insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StateError> {
        let mut inner = self.inner.write().await;
        Ok(inner.evict(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError> {
        let re = glob_to_regex(pattern)?;
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .iter()
            .filter(|k| re.is_match(k))
            .filter(|k| {
                inner
                    .entries
                    .get(k.as_str())
                    .map(|e| !e.is_expired(now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn clear(&self, pattern: &str) -> Result<usize, StateError> {
        let re = glob_to_regex(pattern)?;
        let mut inner = self.inner.write().await;
        let matched: Vec<String> = inner
            .index
            .iter()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect();
        for key in &matched {
            inner.evict(key);
        }
        Ok(matched.len())
    }
}
