//! Echo Agent（演示与测试用）

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentResponse, AgentTask, AgentType, CapabilityAgent};
use crate::state::SharedMemoryHandle;

/// Echo Agent：回显任务描述，附带可选的 `text` 参数
pub struct EchoAgent {
    agent_type: AgentType,
    prefix: Option<String>,
}

impl EchoAgent {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl CapabilityAgent for EchoAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn description(&self) -> &str {
        "Echo the task description (for testing). Params: {\"text\": \"extra\"}"
    }

    async fn process(
        &self,
        task: &AgentTask,
        _memory: &SharedMemoryHandle,
        cancel: CancellationToken,
    ) -> AgentResponse {
        if cancel.is_cancelled() {
            return AgentResponse::failure(task, "cancelled");
        }
        let mut content = match &self.prefix {
            Some(p) => format!("[{}] {}", p, task.description),
            None => task.description.clone(),
        };
        let text = task.parameter_str("text");
        if let Some(text) = text {
            content.push_str(": ");
            content.push_str(text);
        }
        AgentResponse::success(task, content)
            .with_tool("echo")
            .with_data(json!({ "description": task.description, "text": text }))
    }
}
