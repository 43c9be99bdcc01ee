//! 执行计划
//!
//! 规划器每个请求产出一份 `ExecutionPlan`，编排器只校验其形状、消费一次。

use serde::{Deserialize, Serialize};

use crate::agents::AgentTask;

/// 派发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionPattern {
    /// 严格按列表顺序逐个执行
    Sequential,
    /// 有界并发，全部完成后汇总
    Parallel,
    /// 多轮迭代，每轮读取同伴上一轮的产出
    Collaborative,
    /// 规划器输出了无法识别的模式；校验阶段会拒绝
    #[serde(other)]
    Unsupported,
}

impl Default for ExecutionPattern {
    fn default() -> Self {
        Self::Sequential
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub primary_intent: String,
    #[serde(default)]
    pub tasks: Vec<AgentTask>,
    #[serde(default)]
    pub execution_pattern: ExecutionPattern,
    #[serde(default)]
    pub estimated_time_seconds: u64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExecutionPlan {
    pub fn new(primary_intent: impl Into<String>, execution_pattern: ExecutionPattern) -> Self {
        Self {
            primary_intent: primary_intent.into(),
            tasks: Vec::new(),
            execution_pattern,
            estimated_time_seconds: 0,
            notes: None,
        }
    }

    /// 不需要任何 Agent 的普通对话计划
    pub fn conversational(primary_intent: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            notes: Some(reply.into()),
            ..Self::new(primary_intent, ExecutionPattern::Sequential)
        }
    }

    pub fn with_task(mut self, task: AgentTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_estimated_time(mut self, seconds: u64) -> Self {
        self.estimated_time_seconds = seconds;
        self
    }

    /// 解析规划器返回的 JSON（允许 ```json 代码块包裹）
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let trimmed = text.trim();
        let json_str = if let Some(start) = trimmed.find("```json") {
            let rest = &trimmed[start + 7..];
            rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
        } else if let Some((start, end)) = trimmed
            .find('{')
            .zip(trimmed.rfind('}'))
            .filter(|(start, end)| start < end)
        {
            &trimmed[start..=end]
        } else {
            trimmed
        };
        serde_json::from_str(json_str)
    }
}
