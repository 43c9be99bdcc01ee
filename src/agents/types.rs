//! 任务 / 响应契约
//!
//! 编排器与能力 Agent 之间只通过 `AgentTask` -> `AgentResponse` 交互；
//! 编排器除路由外不对任何 `AgentType` 做特殊处理。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 能力 Agent 类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// 云资源查询与变更
    Infrastructure,
    /// 合规规则评估
    Compliance,
    /// 成本分析
    CostManagement,
    /// 安全态势
    Security,
    /// 监控与告警
    Monitoring,
    /// 文档解析与检索
    Documentation,
    /// 普通对话
    Conversation,
    /// 规划器输出了无法识别的类型；校验阶段会拒绝
    #[serde(other)]
    Unknown,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Infrastructure => "infrastructure",
            AgentType::Compliance => "compliance",
            AgentType::CostManagement => "cost_management",
            AgentType::Security => "security",
            AgentType::Monitoring => "monitoring",
            AgentType::Documentation => "documentation",
            AgentType::Conversation => "conversation",
            AgentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 派发给能力 Agent 的任务；由规划器创建，派发后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub agent_type: AgentType,
    pub description: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub is_critical: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conversation_id: String,
    /// 单任务超时（秒），未设置时使用编排器配置
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AgentTask {
    pub fn new(
        agent_type: AgentType,
        description: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            agent_type,
            description: description.into(),
            parameters: HashMap::new(),
            is_critical: false,
            priority: 0,
            conversation_id: conversation_id.into(),
            timeout_secs: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// 参数存在且非空（null / 空字符串 / 空数组都视为未提供）
    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.get(key).map(is_present).unwrap_or(false)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

/// 能力 Agent 对单个任务的响应；每个派发的任务恰好一个
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub task_id: String,
    pub agent_type: AgentType,
    pub content: String,
    pub success: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub tools_invoked: Vec<String>,
    /// 领域相关的结构化结果（如资源列表、成本明细）
    #[serde(default)]
    pub data: Option<Value>,
}

impl AgentResponse {
    pub fn success(task: &AgentTask, content: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            agent_type: task.agent_type,
            content: content.into(),
            success: true,
            metadata: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            execution_time_ms: 0,
            tools_invoked: Vec::new(),
            data: None,
        }
    }

    pub fn failure(task: &AgentTask, error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::success(task, String::new())
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools_invoked.push(tool.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
