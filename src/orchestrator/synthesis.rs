//! 结果合成
//!
//! 报告顺序固定为计划中的任务顺序，与完成顺序无关；元数据按 `{agent_type}.{key}` 命名空间合并，
//! Agent 的结构化结果放在 `{agent_type}.data`。

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::agents::{AgentResponse, AgentTask, AgentType};
use crate::core::OrchestraError;
use crate::orchestrator::follow_up::FollowUp;
use crate::orchestrator::OrchestratedResponse;
use crate::planner::ExecutionPattern;

/// 一次派发过程的原始结果
#[derive(Debug, Default)]
pub(crate) struct RunOutcome {
    /// 每个已派发任务的最终响应（按计划顺序）
    pub responses: Vec<AgentResponse>,
    /// 按派发顺序记录的 Agent（可能重复）
    pub invoked: Vec<AgentType>,
    pub calls: usize,
    pub cancelled: bool,
    /// 关键任务失败后中止了后续派发
    pub aborted_after: Option<String>,
    /// 协作模式实际执行的轮数
    pub rounds: usize,
}

impl RunOutcome {
    pub fn agents_invoked(&self) -> Vec<AgentType> {
        dedup(&self.invoked)
    }
}

/// 去重并保持首次出现的顺序
pub(crate) fn dedup(agents: &[AgentType]) -> Vec<AgentType> {
    let mut seen = HashSet::new();
    agents.iter().copied().filter(|a| seen.insert(*a)).collect()
}

fn task_error(response: &AgentResponse, error: &str) -> String {
    format!("{} ({}): {}", response.agent_type, response.task_id, error)
}

/// 合成最终结果；响应与计划对不上时返回 Synthesis 错误
pub(crate) fn synthesize(
    primary_intent: &str,
    pattern: ExecutionPattern,
    tasks: &[AgentTask],
    outcome: &RunOutcome,
    follow_up: &FollowUp,
) -> Result<OrchestratedResponse, OrchestraError> {
    let by_id: HashMap<&str, &AgentTask> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();

    let mut sections = Vec::new();
    let mut metadata = HashMap::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut critical_failed = false;

    for response in &outcome.responses {
        let task = by_id.get(response.task_id.as_str()).ok_or_else(|| {
            OrchestraError::Synthesis(format!("response for unknown task {}", response.task_id))
        })?;
        if task.agent_type != response.agent_type {
            return Err(OrchestraError::Synthesis(format!(
                "task {} was planned for {} but answered by {}",
                task.task_id, task.agent_type, response.agent_type
            )));
        }

        if response.success {
            if !response.content.trim().is_empty() {
                sections.push((response.agent_type, response.content.trim().to_string()));
            }
        } else {
            critical_failed |= task.is_critical;
            if response.errors.is_empty() {
                errors.push(task_error(response, "failed without error detail"));
            }
        }
        errors.extend(response.errors.iter().map(|e| task_error(response, e)));
        warnings.extend(
            response
                .warnings
                .iter()
                .map(|w| format!("{}: {}", response.agent_type, w)),
        );
        for (key, value) in &response.metadata {
            metadata.insert(format!("{}.{}", response.agent_type, key), value.clone());
        }
        if let Some(data) = &response.data {
            metadata.insert(format!("{}.data", response.agent_type), data.clone());
        }
    }

    if let Some(task_id) = &outcome.aborted_after {
        warnings.push(format!(
            "Remaining tasks were not dispatched after critical task {} failed",
            task_id
        ));
        metadata.insert("orchestrator.aborted_after".to_string(), Value::from(task_id.as_str()));
    }
    if pattern == ExecutionPattern::Collaborative {
        metadata.insert("orchestrator.rounds".to_string(), Value::from(outcome.rounds));
    }
    if !follow_up.skipped_tasks.is_empty() {
        metadata.insert(
            "orchestrator.skipped_tasks".to_string(),
            Value::from(follow_up.skipped_tasks.clone()),
        );
    }

    let all_failed = !outcome.responses.is_empty() && outcome.responses.iter().all(|r| !r.success);
    let success = !critical_failed && !all_failed;

    let mut final_response = match sections.len() {
        0 if all_failed => format!(
            "I couldn't complete the request: {}",
            errors.first().map(String::as_str).unwrap_or("all agents failed")
        ),
        0 => String::new(),
        1 => sections.remove(0).1,
        _ => sections
            .iter()
            .map(|(agent, content)| format!("[{}]\n{}", agent, content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    let follow_up_prompt = follow_up.prompt();
    if let Some(prompt) = &follow_up_prompt {
        if !final_response.is_empty() {
            final_response.push_str("\n\n");
        }
        final_response.push_str(prompt);
    }
    if final_response.is_empty() {
        final_response = "No results were produced for this request.".to_string();
    }

    Ok(OrchestratedResponse {
        final_response,
        primary_intent: primary_intent.to_string(),
        agents_invoked: outcome.agents_invoked(),
        execution_pattern: pattern,
        total_agent_calls: outcome.calls,
        execution_time_ms: 0,
        success,
        requires_follow_up: follow_up.is_required(),
        follow_up_prompt,
        missing_fields: follow_up.missing_fields.clone(),
        metadata,
        errors,
        warnings,
        cancelled: false,
    })
}

/// 合成失败时的降级：拼接已有的全部内容
pub(crate) fn best_effort(
    primary_intent: &str,
    pattern: ExecutionPattern,
    outcome: &RunOutcome,
    follow_up: &FollowUp,
    error: &OrchestraError,
) -> OrchestratedResponse {
    let final_response = outcome
        .responses
        .iter()
        .map(|r| r.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut errors = vec![error.to_string()];
    errors.extend(
        outcome
            .responses
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| task_error(r, e))),
    );

    OrchestratedResponse {
        final_response,
        primary_intent: primary_intent.to_string(),
        agents_invoked: outcome.agents_invoked(),
        execution_pattern: pattern,
        total_agent_calls: outcome.calls,
        execution_time_ms: 0,
        success: false,
        requires_follow_up: follow_up.is_required(),
        follow_up_prompt: follow_up.prompt(),
        missing_fields: follow_up.missing_fields.clone(),
        metadata: HashMap::new(),
        errors,
        warnings: Vec::new(),
        cancelled: false,
    }
}
