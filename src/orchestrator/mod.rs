//! 编排器：把一份执行计划变成一个编排结果
//!
//! 流程：规划器产出计划 -> 校验（空计划 / 未注册 Agent / 不支持的模式一律拒绝，降级为普通回复）
//! -> 追问检测（缺参数的任务不派发）-> 按模式派发 -> 合成 -> 记录到会话历史。
//! 单个任务失败只是数据；只有规划失败且没有兜底回复时才向调用方返回错误。

pub mod builder;
pub mod dispatch;
mod follow_up;
pub mod response;
mod synthesis;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::config::OrchestratorSection;
use crate::core::{OrchestraError, TaskScheduler};
use crate::planner::{ExecutionPattern, ExecutionPlan, Planner, PlanningContext};
use crate::state::{
    AgentStateManager, ConversationState, ConversationStateManager, ConversationStatus, SharedMemory,
};

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use response::OrchestratedResponse;

pub struct Orchestrator {
    registry: AgentRegistry,
    planner: Arc<dyn Planner>,
    conversations: Arc<ConversationStateManager>,
    agent_states: Arc<AgentStateManager>,
    shared: Arc<SharedMemory>,
    scheduler: TaskScheduler,
    settings: OrchestratorSection,
}

impl Orchestrator {
    /// 完整的一轮：规划 -> 执行 -> 记录。
    ///
    /// 取消后不再等待任何状态读写；被取消的轮次不写入会话历史。
    pub async fn handle(
        &self,
        conversation_id: &str,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<OrchestratedResponse, OrchestraError> {
        let start = Instant::now();
        let Some(state) = until_cancelled(&cancel, self.conversations.get_or_create(conversation_id)).await
        else {
            return Ok(self.abandoned(conversation_id, start));
        };
        tracing::info!(conversation_id, "Handling request");

        let context = self.planning_context(&state);
        let response = match self
            .planner
            .plan(message, conversation_id, &context, cancel.clone())
            .await
        {
            Ok(plan) => match self.validate_plan(&plan) {
                Ok(()) => self.run_plan(conversation_id, plan, &cancel).await,
                Err(e) if e.is_plan_rejection() => self.degrade(&plan, e)?,
                Err(e) => return Err(e),
            },
            Err(OrchestraError::Cancelled) => return Ok(self.abandoned(conversation_id, start)),
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Planning failed");
                match &self.settings.fallback_response {
                    Some(text) => OrchestratedResponse::fallback(text.clone(), e.to_string()),
                    None => return Err(e),
                }
            }
        };
        let response = response.with_execution_time(start.elapsed().as_millis() as u64);

        let recorded = until_cancelled(
            &cancel,
            self.conversations.record_exchange(conversation_id, message, &response),
        )
        .await;
        tracing::info!(
            conversation_id,
            success = response.success,
            cancelled = response.cancelled,
            recorded = recorded.is_some(),
            calls = response.total_agent_calls,
            duration_ms = response.execution_time_ms,
            "Request handled"
        );
        Ok(response)
    }

    /// 规划前或规划中被取消
    fn abandoned(&self, conversation_id: &str, start: Instant) -> OrchestratedResponse {
        tracing::info!(conversation_id, "Request cancelled before dispatch");
        OrchestratedResponse::cancelled("unknown", ExecutionPattern::Sequential, Vec::new())
            .with_execution_time(start.elapsed().as_millis() as u64)
    }

    /// 只执行给定计划，不调用规划器、不写会话历史；计划无效时返回错误
    pub async fn execute_plan(
        &self,
        conversation_id: &str,
        plan: ExecutionPlan,
        cancel: CancellationToken,
    ) -> Result<OrchestratedResponse, OrchestraError> {
        let start = Instant::now();
        self.validate_plan(&plan)?;
        let response = self.run_plan(conversation_id, plan, &cancel).await;
        Ok(response.with_execution_time(start.elapsed().as_millis() as u64))
    }

    /// 校验计划形状：非空、模式受支持、任务 ID 唯一且所有 Agent 已注册
    pub fn validate_plan(&self, plan: &ExecutionPlan) -> Result<(), OrchestraError> {
        if plan.execution_pattern == ExecutionPattern::Unsupported {
            return Err(OrchestraError::UnsupportedPattern);
        }
        if plan.tasks.is_empty() {
            return Err(OrchestraError::InvalidPlan("plan contains no tasks".to_string()));
        }
        let mut ids = HashSet::new();
        for task in &plan.tasks {
            if task.task_id.trim().is_empty() {
                return Err(OrchestraError::InvalidPlan("task with empty id".to_string()));
            }
            if !ids.insert(task.task_id.as_str()) {
                return Err(OrchestraError::InvalidPlan(format!(
                    "duplicate task id {}",
                    task.task_id
                )));
            }
            if !self.registry.contains(task.agent_type) {
                return Err(OrchestraError::UnknownAgent(task.agent_type));
            }
        }
        Ok(())
    }

    /// 计划被拒绝：无任务但带回复的计划视为普通对话，其余用兜底回复
    fn degrade(
        &self,
        plan: &ExecutionPlan,
        error: OrchestraError,
    ) -> Result<OrchestratedResponse, OrchestraError> {
        if plan.tasks.is_empty() {
            if let Some(reply) = plan.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                return Ok(OrchestratedResponse::conversational(&plan.primary_intent, reply));
            }
        }
        tracing::warn!(intent = %plan.primary_intent, error = %error, "Plan rejected");
        match &self.settings.fallback_response {
            Some(text) => {
                let mut response = OrchestratedResponse::fallback(text.clone(), error.to_string());
                response.primary_intent = plan.primary_intent.clone();
                Ok(response)
            }
            None => Err(error),
        }
    }

    /// 执行已校验的计划
    async fn run_plan(
        &self,
        conversation_id: &str,
        plan: ExecutionPlan,
        cancel: &CancellationToken,
    ) -> OrchestratedResponse {
        let ExecutionPlan {
            primary_intent,
            mut tasks,
            execution_pattern,
            ..
        } = plan;
        for task in tasks.iter_mut() {
            task.conversation_id = conversation_id.to_string();
        }
        if cancel.is_cancelled() {
            return OrchestratedResponse::cancelled(primary_intent, execution_pattern, Vec::new());
        }

        let Some(state) = until_cancelled(cancel, self.conversations.get(conversation_id)).await else {
            return OrchestratedResponse::cancelled(primary_intent, execution_pattern, Vec::new());
        };
        let variables = state.map(|s| s.variables).unwrap_or_default();
        let (ready, follow_up) = follow_up::partition(&tasks, &self.registry, &variables);
        tracing::info!(
            conversation_id,
            pattern = ?execution_pattern,
            tasks = ready.len(),
            held_back = follow_up.skipped_tasks.len(),
            "Dispatching plan"
        );

        let memory = self.shared.handle(conversation_id, None);
        let outcome = match execution_pattern {
            ExecutionPattern::Sequential => self.run_sequential(&ready, &memory, cancel).await,
            ExecutionPattern::Parallel => self.run_parallel(&ready, &memory, cancel).await,
            ExecutionPattern::Collaborative => {
                self.run_collaborative(&ready, conversation_id, cancel).await
            }
            ExecutionPattern::Unsupported => synthesis::RunOutcome::default(),
        };

        if outcome.cancelled {
            tracing::info!(conversation_id, calls = outcome.calls, "Run cancelled");
            let mut response = OrchestratedResponse::cancelled(
                primary_intent,
                execution_pattern,
                outcome.agents_invoked(),
            );
            response.total_agent_calls = outcome.calls;
            return response;
        }

        match synthesis::synthesize(&primary_intent, execution_pattern, &tasks, &outcome, &follow_up) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Synthesis failed, using best-effort merge");
                synthesis::best_effort(&primary_intent, execution_pattern, &outcome, &follow_up, &e)
            }
        }
    }

    fn planning_context(&self, state: &ConversationState) -> PlanningContext {
        let keep = self.settings.planning_history;
        let skip = state.messages.len().saturating_sub(keep);
        PlanningContext {
            recent_messages: state.messages[skip..].to_vec(),
            variables: state.variables.clone(),
            active_agent: state.active_agent_type,
            available_agents: self.registry.agent_descriptions(),
        }
    }

    /// 结束会话：清理黑板、事件日志与全部 Agent 工作状态，会话标记为 Completed（历史保留）
    pub async fn end_conversation(&self, conversation_id: &str) -> Result<(), OrchestraError> {
        let shared = self.shared.clear(conversation_id).await?;
        let agents = self.agent_states.clear_conversation(conversation_id).await;
        self.conversations
            .set_status(conversation_id, ConversationStatus::Completed)
            .await;
        tracing::info!(conversation_id, shared, agents, "Conversation ended");
        Ok(())
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<ConversationStateManager> {
        &self.conversations
    }

    pub fn agent_states(&self) -> &Arc<AgentStateManager> {
        &self.agent_states
    }

    pub fn shared_memory(&self) -> &Arc<SharedMemory> {
        &self.shared
    }

    pub fn settings(&self) -> &OrchestratorSection {
        &self.settings
    }
}

/// 在取消令牌触发前等待 `fut`；已取消时立即返回 None，不再轮询 `fut`
pub(crate) async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
