//! 编排结果：每个请求恰好产出一个

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;
use crate::planner::ExecutionPattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratedResponse {
    pub final_response: String,
    pub primary_intent: String,
    /// 实际派发过的 Agent（去重，保持首次出现的顺序）
    pub agents_invoked: Vec<AgentType>,
    pub execution_pattern: ExecutionPattern,
    /// 派发次数（协作模式下按轮累计）
    pub total_agent_calls: usize,
    pub execution_time_ms: u64,
    pub success: bool,
    pub requires_follow_up: bool,
    pub follow_up_prompt: Option<String>,
    pub missing_fields: Vec<String>,
    /// 按 `{agent_type}.{key}` 命名空间合并的元数据
    pub metadata: HashMap<String, Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 被取消信号中断；与成功 / 失败区分
    pub cancelled: bool,
}

impl OrchestratedResponse {
    fn empty(primary_intent: impl Into<String>, execution_pattern: ExecutionPattern) -> Self {
        Self {
            final_response: String::new(),
            primary_intent: primary_intent.into(),
            agents_invoked: Vec::new(),
            execution_pattern,
            total_agent_calls: 0,
            execution_time_ms: 0,
            success: true,
            requires_follow_up: false,
            follow_up_prompt: None,
            missing_fields: Vec::new(),
            metadata: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    /// 不派发任何 Agent 的普通回复
    pub fn conversational(primary_intent: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            final_response: reply.into(),
            ..Self::empty(primary_intent, ExecutionPattern::Sequential)
        }
    }

    /// 规划失败或计划被拒绝时的降级回复
    pub fn fallback(reply: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            final_response: reply.into(),
            success: false,
            errors: vec![reason.into()],
            ..Self::empty("unknown", ExecutionPattern::Sequential)
        }
    }

    /// 被取消；`agents_invoked` 只包含取消前已派发的 Agent
    pub fn cancelled(
        primary_intent: impl Into<String>,
        execution_pattern: ExecutionPattern,
        agents_invoked: Vec<AgentType>,
    ) -> Self {
        Self {
            final_response: "Request cancelled.".to_string(),
            total_agent_calls: agents_invoked.len(),
            agents_invoked,
            success: false,
            cancelled: true,
            ..Self::empty(primary_intent, execution_pattern)
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}
