//! 编排器构建器：统一的组装逻辑
//!
//! 按配置创建状态存储之上的三个管理器与派发调度器，注册能力 Agent 并注入规划器。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::{AgentRegistry, CapabilityAgent};
use crate::config::AppConfig;
use crate::core::{OrchestraError, TaskScheduler};
use crate::orchestrator::Orchestrator;
use crate::planner::Planner;
use crate::state::{
    AgentStateManager, ConversationStateManager, InMemoryStateStore, SharedMemory, StateStore,
};

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn StateStore>>,
    planner: Option<Arc<dyn Planner>>,
    registry: AgentRegistry,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            planner: None,
            registry: AgentRegistry::new(),
        }
    }

    /// 指定状态存储；未指定时使用进程内存储
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_planner(mut self, planner: impl Planner + 'static) -> Self {
        self.planner = Some(Arc::new(planner));
        self
    }

    pub fn with_planner_arc(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_agent(mut self, agent: impl CapabilityAgent + 'static) -> Self {
        self.registry.register(agent);
        self
    }

    pub fn with_agent_arc(mut self, agent: Arc<dyn CapabilityAgent>) -> Self {
        self.registry.register_arc(agent);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建编排器；未注入规划器时返回 Config 错误
    pub fn build(self) -> Result<Orchestrator, OrchestraError> {
        let planner = self
            .planner
            .ok_or_else(|| OrchestraError::Config("no planner configured".to_string()))?;
        if self.registry.is_empty() {
            tracing::warn!("No capability agents registered, every plan will be rejected");
        }

        let cfg = self.config;
        let store: Arc<dyn StateStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStateStore::new()));
        let ttl = cfg.state.default_ttl();

        let conversations = ConversationStateManager::new(Arc::clone(&store))
            .with_max_messages(cfg.conversation.max_messages)
            .with_ttl(ttl);
        let agent_states = AgentStateManager::new(Arc::clone(&store))
            .with_action_ttl(cfg.agent_state.pending_action_ttl())
            .with_ttl(ttl);
        let shared = SharedMemory::new(store)
            .with_max_events(cfg.shared_memory.max_events)
            .with_ttl(ttl);

        tracing::info!(
            agents = ?self.registry.agent_types(),
            max_concurrency = cfg.orchestrator.max_concurrency,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            registry: self.registry,
            planner,
            conversations: Arc::new(conversations),
            agent_states: Arc::new(agent_states),
            shared: Arc::new(shared),
            scheduler: TaskScheduler::new(cfg.orchestrator.max_concurrency),
            settings: cfg.orchestrator,
        })
    }
}

/// 便捷函数：从默认路径加载配置并创建构建器；加载失败时使用默认配置
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}
