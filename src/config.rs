//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ORCHESTRA__*` 覆盖
//! （双下划线表示嵌套，如 `ORCHESTRA__ORCHESTRATOR__MAX_CONCURRENCY=8`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSection,
    pub conversation: ConversationSection,
    pub agent_state: AgentStateSection,
    pub shared_memory: SharedMemorySection,
    pub state: StateSection,
}

/// [orchestrator] 段：并发、超时、协作轮数与兜底回复
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Parallel / Collaborative 模式下同时执行的任务上限
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单任务超时（秒）；任务自身的 timeout_secs 优先
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_max_collaboration_rounds")]
    pub max_collaboration_rounds: usize,
    /// 交给规划器的最近消息条数
    #[serde(default = "default_planning_history")]
    pub planning_history: usize,
    /// 规划失败或计划被拒绝时的普通回复；为空则把错误返回给调用方
    #[serde(default = "default_fallback_response")]
    pub fallback_response: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            max_collaboration_rounds: default_max_collaboration_rounds(),
            planning_history: default_planning_history(),
            fallback_response: default_fallback_response(),
        }
    }
}

impl OrchestratorSection {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs.max(1))
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    60
}

fn default_max_collaboration_rounds() -> usize {
    3
}

fn default_planning_history() -> usize {
    10
}

fn default_fallback_response() -> Option<String> {
    Some(
        "I'm not sure how to help with that yet. Could you rephrase or add more detail?"
            .to_string(),
    )
}

/// [conversation] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSection {
    /// 历史消息上限，超出后只保留最近的 N 条
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

fn default_max_messages() -> usize {
    crate::state::DEFAULT_MAX_MESSAGES
}

/// [agent_state] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AgentStateSection {
    /// 待确认动作的默认有效期（秒）
    #[serde(default = "default_pending_action_ttl_secs")]
    pub pending_action_ttl_secs: u64,
}

impl Default for AgentStateSection {
    fn default() -> Self {
        Self {
            pending_action_ttl_secs: default_pending_action_ttl_secs(),
        }
    }
}

impl AgentStateSection {
    pub fn pending_action_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_action_ttl_secs.max(1))
    }
}

fn default_pending_action_ttl_secs() -> u64 {
    3600
}

/// [shared_memory] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SharedMemorySection {
    /// 每个会话事件日志的容量
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for SharedMemorySection {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

fn default_max_events() -> usize {
    crate::state::DEFAULT_MAX_EVENTS
}

/// [state] 段：存储层过期策略
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StateSection {
    /// 会话 / Agent / 共享键的过期时间（秒）；不设置则永不过期
    pub default_ttl_secs: Option<u64>,
    /// 后台清理过期条目的间隔（秒）；不设置则只在访问时惰性淘汰
    pub cleanup_interval_secs: Option<u64>,
}

impl StateSection {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// 从 config/default.toml（若存在）与环境变量加载配置
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ORCHESTRA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
