//! 追问检测：必需参数缺失的任务不派发

use std::collections::HashMap;

use serde_json::Value;

use crate::agents::types::is_present;
use crate::agents::{AgentRegistry, AgentTask};

/// 被跳过的任务与缺失字段
#[derive(Debug, Default, Clone)]
pub(crate) struct FollowUp {
    /// 缺失字段（去重，保持计划中的出现顺序）
    pub missing_fields: Vec<String>,
    pub skipped_tasks: Vec<String>,
}

impl FollowUp {
    pub fn is_required(&self) -> bool {
        !self.missing_fields.is_empty()
    }

    pub fn prompt(&self) -> Option<String> {
        if !self.is_required() {
            return None;
        }
        Some(format!(
            "To continue I need a bit more information: {}.",
            self.missing_fields.join(", ")
        ))
    }
}

/// 参数在任务参数或会话变量中存在且非空即视为已解析
fn is_resolved(task: &AgentTask, name: &str, variables: &HashMap<String, Value>) -> bool {
    task.has_parameter(name) || variables.get(name).map(is_present).unwrap_or(false)
}

/// 拆分为可派发任务与需要追问的任务；可派发任务保持原顺序
pub(crate) fn partition(
    tasks: &[AgentTask],
    registry: &AgentRegistry,
    variables: &HashMap<String, Value>,
) -> (Vec<AgentTask>, FollowUp) {
    let mut ready = Vec::with_capacity(tasks.len());
    let mut follow_up = FollowUp::default();

    for task in tasks {
        let missing: Vec<String> = registry
            .get(task.agent_type)
            .map(|agent| {
                agent
                    .required_parameters()
                    .iter()
                    .filter(|name| !is_resolved(task, name, variables))
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default();

        if missing.is_empty() {
            ready.push(task.clone());
            continue;
        }

        tracing::info!(
            task_id = %task.task_id,
            agent = %task.agent_type,
            missing = ?missing,
            "Task held back for follow-up"
        );
        for name in missing {
            if !follow_up.missing_fields.contains(&name) {
                follow_up.missing_fields.push(name);
            }
        }
        follow_up.skipped_tasks.push(task.task_id.clone());
    }

    (ready, follow_up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::agents::{AgentResponse, AgentType, CapabilityAgent, EchoAgent};
    use crate::state::SharedMemoryHandle;

    struct NeedsRegion;

    #[async_trait]
    impl CapabilityAgent for NeedsRegion {
        fn agent_type(&self) -> AgentType {
            AgentType::Infrastructure
        }

        fn required_parameters(&self) -> &[&str] {
            &["region", "subscription_id"]
        }

        async fn process(
            &self,
            task: &AgentTask,
            _memory: &SharedMemoryHandle,
            _cancel: CancellationToken,
        ) -> AgentResponse {
            AgentResponse::success(task, "ok")
        }
    }

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(NeedsRegion);
        registry.register(EchoAgent::new(AgentType::Compliance));
        registry
    }

    #[test]
    fn test_missing_parameters_hold_back_only_affected_task() {
        let tasks = vec![
            AgentTask::new(AgentType::Infrastructure, "list vms", "c1")
                .with_id("t1")
                .with_parameter("region", ""),
            AgentTask::new(AgentType::Compliance, "check tags", "c1").with_id("t2"),
        ];
        let (ready, follow_up) = partition(&tasks, &registry(), &HashMap::new());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task_id, "t2");
        assert_eq!(follow_up.missing_fields, vec!["region", "subscription_id"]);
        assert_eq!(follow_up.skipped_tasks, vec!["t1"]);
        assert!(follow_up.prompt().unwrap().contains("region, subscription_id"));
    }

    #[test]
    fn test_conversation_variables_resolve_parameters() {
        let tasks = vec![AgentTask::new(AgentType::Infrastructure, "list vms", "c1")
            .with_parameter("region", "eu-west-1")];
        let mut vars = HashMap::new();
        vars.insert("subscription_id".to_string(), Value::from("sub-123"));
        let (ready, follow_up) = partition(&tasks, &registry(), &vars);
        assert_eq!(ready.len(), 1);
        assert!(!follow_up.is_required());
        assert!(follow_up.prompt().is_none());
    }
}
