//! 规划器抽象
//!
//! 规划器（通常是一次 LLM 调用）对编排器是不透明且可能不确定的；编排器只校验计划形状。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentType;
use crate::core::OrchestraError;
use crate::planner::ExecutionPlan;
use crate::state::Message;

/// 规划时可见的会话上下文
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    /// 最近的历史消息（时间升序）
    pub recent_messages: Vec<Message>,
    pub variables: HashMap<String, Value>,
    pub active_agent: Option<AgentType>,
    /// 当前已注册的 Agent 类型及其能力描述（按类型排序）
    pub available_agents: Vec<(AgentType, String)>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        message: &str,
        conversation_id: &str,
        context: &PlanningContext,
        cancel: CancellationToken,
    ) -> Result<ExecutionPlan, OrchestraError>;
}
