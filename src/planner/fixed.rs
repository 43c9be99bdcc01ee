//! 固定计划规划器（用于测试与演示，无需模型）
//!
//! 按注册顺序匹配消息中的关键词，返回预置的 ExecutionPlan；任务的 conversation_id 会被替换为当前会话。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestraError;
use crate::planner::{ExecutionPlan, Planner, PlanningContext};

/// 固定计划规划器
#[derive(Debug, Default)]
pub struct StaticPlanner {
    routes: Vec<(String, ExecutionPlan)>,
    fallback: Option<ExecutionPlan>,
}

impl StaticPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次都返回同一份计划
    pub fn always(plan: ExecutionPlan) -> Self {
        Self {
            routes: Vec::new(),
            fallback: Some(plan),
        }
    }

    /// 消息包含 `keyword`（不区分大小写）时返回该计划
    pub fn route(mut self, keyword: impl Into<String>, plan: ExecutionPlan) -> Self {
        self.routes.push((keyword.into().to_lowercase(), plan));
        self
    }

    pub fn otherwise(mut self, plan: ExecutionPlan) -> Self {
        self.fallback = Some(plan);
        self
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(
        &self,
        message: &str,
        conversation_id: &str,
        _context: &PlanningContext,
        cancel: CancellationToken,
    ) -> Result<ExecutionPlan, OrchestraError> {
        if cancel.is_cancelled() {
            return Err(OrchestraError::Cancelled);
        }
        let lower = message.to_lowercase();
        let mut plan = self
            .routes
            .iter()
            .find(|(k, _)| lower.contains(k.as_str()))
            .map(|(_, p)| p.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| OrchestraError::Planning(format!("no plan for message: {}", message)))?;
        for task in plan.tasks.iter_mut() {
            task.conversation_id = conversation_id.to_string();
        }
        Ok(plan)
    }
}
