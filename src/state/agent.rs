//! Agent 工作状态
//!
//! 每个 (会话, Agent) 一份状态（`agent:{id}:{type}`），首次访问时懒创建：
//! 工具结果缓存、Agent 内部工作流状态机、等待用户确认的动作。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;
use crate::core::TransitionError;
use crate::state::conversation::now_ms;
use crate::state::locks::KeyedLocks;
use crate::state::store::{agent_key, StateStore, StateStoreExt};

/// 待确认动作默认有效期：1 小时
pub const DEFAULT_ACTION_TTL: Duration = Duration::from_secs(3600);

/// 一次工具调用的结果（用于跨轮次复用，避免重复的昂贵外部调用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub executed_at: i64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    pub fn ok(tool_name: impl Into<String>, output: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output,
            error: None,
            executed_at: now_ms(),
            duration_ms: 0,
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            executed_at: now_ms(),
            duration_ms: 0,
        }
    }
}

/// 工作流状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    NotStarted,
    InProgress,
    AwaitingConfirmation,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Completed / Failed / Cancelled 为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// Agent 内部的多步工作流；不变量：step_index <= total_steps，终态不可再变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub current_step: String,
    pub step_index: usize,
    pub total_steps: usize,
    pub status: WorkflowStatus,
}

impl WorkflowState {
    pub fn new(workflow_id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            current_step: String::new(),
            step_index: 0,
            total_steps,
            status: WorkflowStatus::NotStarted,
        }
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::WorkflowFinished(format!("{:?}", self.status)));
        }
        Ok(())
    }

    /// 前进到下一步；走完最后一步时自动 Completed
    pub fn advance(&mut self, step: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let next = self.step_index + 1;
        if next > self.total_steps {
            return Err(TransitionError::StepOutOfRange {
                index: next,
                total: self.total_steps,
            });
        }
        self.step_index = next;
        self.current_step = step.into();
        self.status = if next == self.total_steps {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::InProgress
        };
        Ok(())
    }

    pub fn transition(&mut self, status: WorkflowStatus) -> Result<(), TransitionError> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }
}

/// 待确认动作状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
    Executed,
}

/// 等待用户确认的动作（破坏性 / 高风险步骤）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    pub action_type: String,
    pub description: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: ActionStatus,
}

impl PendingAction {
    pub fn new(
        action_type: impl Into<String>,
        description: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            action_id: format!("action_{}", uuid::Uuid::new_v4()),
            action_type: action_type.into(),
            description: description.into(),
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
            status: ActionStatus::Pending,
        }
    }

    /// 派生谓词：now > expires_at
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    /// 对外可见的状态：Pending 且已过期视为 Expired
    pub fn effective_status_at(&self, now_ms: i64) -> ActionStatus {
        if self.status == ActionStatus::Pending && self.is_expired_at(now_ms) {
            ActionStatus::Expired
        } else {
            self.status
        }
    }

    fn transition_at(&mut self, to: ActionStatus, now_ms: i64) -> Result<(), TransitionError> {
        let from = self.effective_status_at(now_ms);
        let allowed = matches!(
            (from, to),
            (ActionStatus::Pending, ActionStatus::Confirmed)
                | (ActionStatus::Pending, ActionStatus::Rejected)
                | (ActionStatus::Pending, ActionStatus::Expired)
                | (ActionStatus::Confirmed, ActionStatus::Executed)
        );
        if !allowed {
            if from == ActionStatus::Expired {
                return Err(TransitionError::ActionExpired(self.action_id.clone()));
            }
            return Err(TransitionError::InvalidActionTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// 单个 (会话, Agent) 的工作状态
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_type: AgentType,
    pub conversation_id: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub tool_results: HashMap<String, ToolExecutionResult>,
    #[serde(default)]
    pub current_workflow: Option<WorkflowState>,
    #[serde(default)]
    pub pending_actions: Vec<PendingAction>,
    pub last_activity_at: i64,
}

impl AgentState {
    pub fn new(conversation_id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            agent_type,
            conversation_id: conversation_id.into(),
            data: HashMap::new(),
            tool_results: HashMap::new(),
            current_workflow: None,
            pending_actions: Vec::new(),
            last_activity_at: now_ms(),
        }
    }

    fn action_mut(&mut self, action_id: &str) -> Result<&mut PendingAction, TransitionError> {
        self.pending_actions
            .iter_mut()
            .find(|a| a.action_id == action_id)
            .ok_or_else(|| TransitionError::ActionNotFound(action_id.to_string()))
    }

    fn workflow_mut(&mut self) -> Result<&mut WorkflowState, TransitionError> {
        self.current_workflow
            .as_mut()
            .ok_or(TransitionError::NoActiveWorkflow)
    }
}

/// Agent 状态管理器
pub struct AgentStateManager {
    store: Arc<dyn StateStore>,
    locks: KeyedLocks,
    action_ttl: Duration,
    ttl: Option<Duration>,
}

impl AgentStateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            action_ttl: DEFAULT_ACTION_TTL,
            ttl: None,
        }
    }

    pub fn with_action_ttl(mut self, ttl: Duration) -> Self {
        self.action_ttl = ttl;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    async fn load_locked(&self, key: &str, conversation_id: &str, agent: AgentType) -> AgentState {
        match self.store.get::<AgentState>(key).await {
            Some(state) => state,
            None => {
                let state = AgentState::new(conversation_id, agent);
                self.persist(key, &state).await;
                tracing::debug!(conversation_id, agent = %agent, "Agent state created");
                state
            }
        }
    }

    async fn persist(&self, key: &str, state: &AgentState) {
        if let Err(e) = self.store.set(key, state, self.ttl).await {
            tracing::warn!(key, error = %e, "Failed to persist agent state");
        }
    }

    /// 加锁读-改-写；闭包返回 Err 时不写回
    async fn update<F, R>(
        &self,
        conversation_id: &str,
        agent: AgentType,
        f: F,
    ) -> Result<R, TransitionError>
    where
        F: FnOnce(&mut AgentState) -> Result<R, TransitionError>,
    {
        let key = agent_key(conversation_id, agent.as_str());
        let _guard = self.locks.acquire(&key).await;
        let mut state = self.load_locked(&key, conversation_id, agent).await;
        let out = f(&mut state)?;
        state.last_activity_at = now_ms();
        self.persist(&key, &state).await;
        Ok(out)
    }

    /// 获取状态；不存在时创建空状态，从不报错
    pub async fn get_agent_state(&self, conversation_id: &str, agent: AgentType) -> AgentState {
        let key = agent_key(conversation_id, agent.as_str());
        let _guard = self.locks.acquire(&key).await;
        self.load_locked(&key, conversation_id, agent).await
    }

    /// 保存状态，总是刷新 last_activity_at
    pub async fn save_agent_state(&self, state: &AgentState) {
        let key = agent_key(&state.conversation_id, state.agent_type.as_str());
        let _guard = self.locks.acquire(&key).await;
        let mut state = state.clone();
        state.last_activity_at = now_ms();
        self.persist(&key, &state).await;
    }

    pub async fn clear_agent_state(&self, conversation_id: &str, agent: AgentType) -> bool {
        let key = agent_key(conversation_id, agent.as_str());
        let _guard = self.locks.acquire(&key).await;
        self.store.remove(&key).await.unwrap_or(false)
    }

    /// 删除某个会话下所有 Agent 的状态
    pub async fn clear_conversation(&self, conversation_id: &str) -> usize {
        match self.store.clear(&format!("agent:{}:*", conversation_id)).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Failed to clear agent states");
                0
            }
        }
    }

    pub async fn set_data<T>(&self, conversation_id: &str, agent: AgentType, name: &str, value: &T)
    where
        T: Serialize + Sync + ?Sized,
    {
        let Ok(value) = serde_json::to_value(value) else {
            tracing::warn!(conversation_id, name, "Agent data not serializable");
            return;
        };
        let _ = self
            .update(conversation_id, agent, |s| {
                s.data.insert(name.to_string(), value);
                Ok(())
            })
            .await;
    }

    pub async fn get_data<T>(&self, conversation_id: &str, agent: AgentType, name: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let state = self.get_agent_state(conversation_id, agent).await;
        serde_json::from_value(state.data.get(name)?.clone()).ok()
    }

    /// 缓存工具结果
    pub async fn set_tool_result(
        &self,
        conversation_id: &str,
        agent: AgentType,
        result: ToolExecutionResult,
    ) {
        let _ = self
            .update(conversation_id, agent, |s| {
                s.tool_results.insert(result.tool_name.clone(), result);
                Ok(())
            })
            .await;
    }

    pub async fn get_tool_result(
        &self,
        conversation_id: &str,
        agent: AgentType,
        tool_name: &str,
    ) -> Option<ToolExecutionResult> {
        self.get_agent_state(conversation_id, agent)
            .await
            .tool_results
            .get(tool_name)
            .cloned()
    }

    /// 开始新的工作流，替换当前工作流
    pub async fn start_workflow(
        &self,
        conversation_id: &str,
        agent: AgentType,
        workflow_id: &str,
        total_steps: usize,
    ) -> WorkflowState {
        let workflow = WorkflowState {
            status: WorkflowStatus::InProgress,
            ..WorkflowState::new(workflow_id, total_steps)
        };
        let result = self
            .update(conversation_id, agent, |s| {
                if let Some(old) = s.current_workflow.as_ref() {
                    if !old.status.is_terminal() {
                        tracing::info!(workflow_id = %old.workflow_id, "Replacing unfinished workflow");
                    }
                }
                s.current_workflow = Some(workflow.clone());
                Ok(workflow.clone())
            })
            .await;
        result.unwrap_or(workflow)
    }

    pub async fn advance_workflow(
        &self,
        conversation_id: &str,
        agent: AgentType,
        step: &str,
    ) -> Result<WorkflowState, TransitionError> {
        self.update(conversation_id, agent, |s| {
            let wf = s.workflow_mut()?;
            wf.advance(step)?;
            Ok(wf.clone())
        })
        .await
    }

    pub async fn transition_workflow(
        &self,
        conversation_id: &str,
        agent: AgentType,
        status: WorkflowStatus,
    ) -> Result<WorkflowState, TransitionError> {
        self.update(conversation_id, agent, |s| {
            let wf = s.workflow_mut()?;
            wf.transition(status)?;
            Ok(wf.clone())
        })
        .await
    }

    /// 创建待确认动作；ttl 为 None 时使用默认有效期
    pub async fn create_pending_action(
        &self,
        conversation_id: &str,
        agent: AgentType,
        action_type: &str,
        description: &str,
        ttl: Option<Duration>,
    ) -> PendingAction {
        let action = PendingAction::new(action_type, description, ttl.unwrap_or(self.action_ttl));
        let _ = self
            .update(conversation_id, agent, |s| {
                s.pending_actions.push(action.clone());
                Ok(())
            })
            .await;
        tracing::info!(
            conversation_id,
            agent = %agent,
            action_id = %action.action_id,
            "Pending action created"
        );
        action
    }

    async fn transition_action(
        &self,
        conversation_id: &str,
        agent: AgentType,
        action_id: &str,
        to: ActionStatus,
    ) -> Result<PendingAction, TransitionError> {
        let now = now_ms();
        let result = self
            .update(conversation_id, agent, |s| {
                let action = s.action_mut(action_id)?;
                action.transition_at(to, now)?;
                Ok(action.clone())
            })
            .await;
        if let Err(TransitionError::ActionExpired(_)) = &result {
            // 过期是派生状态：拒绝迁移的同时把 Expired 落盘
            self.expire_pending_actions(conversation_id, agent).await;
        }
        result
    }

    pub async fn confirm_action(
        &self,
        conversation_id: &str,
        agent: AgentType,
        action_id: &str,
    ) -> Result<PendingAction, TransitionError> {
        self.transition_action(conversation_id, agent, action_id, ActionStatus::Confirmed)
            .await
    }

    pub async fn reject_action(
        &self,
        conversation_id: &str,
        agent: AgentType,
        action_id: &str,
    ) -> Result<PendingAction, TransitionError> {
        self.transition_action(conversation_id, agent, action_id, ActionStatus::Rejected)
            .await
    }

    /// 已确认的动作实际执行后调用
    pub async fn mark_executed(
        &self,
        conversation_id: &str,
        agent: AgentType,
        action_id: &str,
    ) -> Result<PendingAction, TransitionError> {
        self.transition_action(conversation_id, agent, action_id, ActionStatus::Executed)
            .await
    }

    /// 将所有已过期的 Pending 动作落盘为 Expired，返回数量
    pub async fn expire_pending_actions(&self, conversation_id: &str, agent: AgentType) -> usize {
        let now = now_ms();
        self.update(conversation_id, agent, |s| {
            let mut n = 0;
            for action in s.pending_actions.iter_mut() {
                if action.status == ActionStatus::Pending && action.is_expired_at(now) {
                    action.status = ActionStatus::Expired;
                    n += 1;
                }
            }
            Ok(n)
        })
        .await
        .unwrap_or(0)
    }

    /// 仍可确认的动作（Pending 且未过期）
    pub async fn pending_actions(&self, conversation_id: &str, agent: AgentType) -> Vec<PendingAction> {
        let now = now_ms();
        self.get_agent_state(conversation_id, agent)
            .await
            .pending_actions
            .into_iter()
            .filter(|a| a.effective_status_at(now) == ActionStatus::Pending)
            .collect()
    }
}
