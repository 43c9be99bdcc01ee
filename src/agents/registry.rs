//! 能力 Agent 注册表
//!
//! 所有能力 Agent 实现 CapabilityAgent（agent_type / process），由 AgentRegistry 在组装阶段按类型注册，
//! 编排器派发时只按 AgentType 路由，不做任何特殊处理。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentResponse, AgentTask, AgentType};
use crate::state::SharedMemoryHandle;

/// 能力 Agent：统一的 任务 -> 响应 契约；失败以 `success = false` 的响应表示，不返回 Err
#[async_trait]
pub trait CapabilityAgent: Send + Sync {
    /// 负责的能力类型
    fn agent_type(&self) -> AgentType;

    /// 能力描述
    fn description(&self) -> &str {
        ""
    }

    /// 派发前必须能解析出的参数名；缺失时编排器不派发该任务，转为追问用户
    fn required_parameters(&self) -> &[&str] {
        &[]
    }

    /// 处理任务；应在 cancel 触发后尽快返回
    async fn process(
        &self,
        task: &AgentTask,
        memory: &SharedMemoryHandle,
        cancel: CancellationToken,
    ) -> AgentResponse;
}

/// Agent 注册表：按 AgentType 存储 Arc<dyn CapabilityAgent>，支持 register / get / contains / agent_types
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn CapabilityAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Agent；同类型重复注册时后者覆盖前者
    pub fn register(&mut self, agent: impl CapabilityAgent + 'static) {
        self.register_arc(Arc::new(agent));
    }

    pub fn register_arc(&mut self, agent: Arc<dyn CapabilityAgent>) {
        let agent_type = agent.agent_type();
        if self.agents.insert(agent_type, agent).is_some() {
            tracing::warn!(agent = %agent_type, "Agent re-registered, previous one replaced");
        }
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn CapabilityAgent>> {
        self.agents.get(&agent_type).cloned()
    }

    pub fn contains(&self, agent_type: AgentType) -> bool {
        self.agents.contains_key(&agent_type)
    }

    /// 已注册类型（排序后返回，便于日志与展示）
    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.agents.keys().copied().collect();
        types.sort();
        types
    }

    /// 返回 (type, description) 列表，供规划器生成可用 Agent 说明
    pub fn agent_descriptions(&self) -> Vec<(AgentType, String)> {
        self.agent_types()
            .into_iter()
            .filter_map(|t| self.agents.get(&t).map(|a| (t, a.description().to_string())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
