//! 错误类型
//!
//! - `StateError`：状态存储后端的读写 / 序列化错误（上层管理器一律降级为缓存未命中或空操作）
//! - `TransitionError`：工作流与待确认动作的非法状态迁移
//! - `OrchestraError`：编排层的硬错误（计划无效、规划失败且无兜底回复等）

use thiserror::Error;

use crate::agents::AgentType;

/// 状态存储错误
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Serialization failed for key '{key}': {message}")]
    Serialization { key: String, message: String },

    #[error("Deserialization failed for key '{key}': {message}")]
    Deserialization { key: String, message: String },

    #[error("Invalid key pattern '{0}'")]
    InvalidPattern(String),

    /// 外部后端（网络 / 磁盘）读写失败
    #[error("State backend error: {0}")]
    Backend(String),
}

/// 工作流 / 待确认动作的状态迁移错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("No active workflow")]
    NoActiveWorkflow,

    #[error("Workflow already finished with status {0}")]
    WorkflowFinished(String),

    #[error("Step index {index} exceeds total steps {total}")]
    StepOutOfRange { index: usize, total: usize },

    #[error("Pending action not found: {0}")]
    ActionNotFound(String),

    #[error("Pending action expired: {0}")]
    ActionExpired(String),

    #[error("Invalid action transition from {from} to {to}")]
    InvalidActionTransition { from: String, to: String },
}

/// 编排层错误：只有计划校验失败、规划失败（且无兜底回复）与合成阶段不可恢复的错误会走到这里
#[derive(Error, Debug)]
pub enum OrchestraError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Plan references unregistered agent: {0}")]
    UnknownAgent(AgentType),

    #[error("Unsupported execution pattern")]
    UnsupportedPattern,

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestraError {
    /// 是否属于计划校验类错误（降级为普通对话回复，不派发任何 Agent）
    pub fn is_plan_rejection(&self) -> bool {
        matches!(
            self,
            OrchestraError::InvalidPlan(_)
                | OrchestraError::UnknownAgent(_)
                | OrchestraError::UnsupportedPattern
        )
    }
}
