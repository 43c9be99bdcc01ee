//! 按执行模式派发任务
//!
//! 每次派发：发布 task_started 事件 -> 在超时内调用 Agent -> 成功则把内容写入黑板
//! （`agent_output:{agent}` / `task_output:{task_id}`）-> 发布 task_completed / task_failed，
//! 并输出一行结构化审计日志。取消信号以子令牌传给 Agent，由 Agent 协作退出，编排器不会强行中断；
//! 编排器自身的状态读写在取消后立即放弃等待。

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentResponse, AgentTask, AgentType};
use crate::orchestrator::synthesis::RunOutcome;
use crate::orchestrator::{until_cancelled, Orchestrator};
use crate::state::{agent_output_key, task_output_key, SharedMemoryHandle};

pub const EVENT_TASK_STARTED: &str = "task_started";
pub const EVENT_TASK_COMPLETED: &str = "task_completed";
pub const EVENT_TASK_FAILED: &str = "task_failed";
pub const EVENT_ROUND_COMPLETED: &str = "round_completed";

/// 协作模式下注入任务参数的键
pub const PARAM_COLLABORATION_ROUND: &str = "collaboration_round";
pub const PARAM_PEER_OUTPUTS: &str = "peer_outputs";

impl Orchestrator {
    /// 派发单个任务；任务失败、超时都以 success = false 的响应返回。
    /// 返回 None 表示 Agent 调用前已被取消，Agent 未被调用。
    pub(super) async fn dispatch_task(
        &self,
        task: &AgentTask,
        memory: &SharedMemoryHandle,
        cancel: &CancellationToken,
    ) -> Option<AgentResponse> {
        let Some(agent) = self.registry.get(task.agent_type) else {
            return Some(AgentResponse::failure(
                task,
                format!("no agent registered for {}", task.agent_type),
            ));
        };
        let memory = memory.for_agent(task.agent_type);
        let started = memory.publish(
            EVENT_TASK_STARTED,
            json!({ "task_id": task.task_id, "description": task.description }),
        );
        until_cancelled(cancel, started).await?;

        let limit = task
            .timeout_secs
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or_else(|| self.settings.task_timeout());
        let start = Instant::now();
        let result = timeout(limit, agent.process(task, &memory, cancel.child_token())).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (mut response, outcome) = match result {
            Ok(response) if response.success => (response, "ok"),
            Ok(response) if cancel.is_cancelled() => (response, "cancelled"),
            Ok(response) => (response, "error"),
            Err(_) => (
                AgentResponse::failure(task, format!("timed out after {}s", limit.as_secs())),
                "timeout",
            ),
        };
        response.task_id = task.task_id.clone();
        response.agent_type = task.agent_type;
        if response.execution_time_ms == 0 {
            response.execution_time_ms = duration_ms;
        }

        let audit = json!({
            "event": "agent_audit",
            "agent": task.agent_type.as_str(),
            "task_id": task.task_id,
            "critical": task.is_critical,
            "ok": response.success,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "tools": response.tools_invoked,
        });
        tracing::info!(audit = %audit.to_string(), "agent");
        if outcome == "timeout" {
            tracing::warn!(task_id = %task.task_id, agent = %task.agent_type, ?limit, "Task timed out");
        }

        if until_cancelled(cancel, self.record_outcome(task, &response, &memory))
            .await
            .is_none()
        {
            tracing::debug!(task_id = %task.task_id, "Cancelled while recording outcome");
        }
        Some(response)
    }

    /// 把结果写入黑板、事件日志与 Agent 工作状态
    async fn record_outcome(&self, task: &AgentTask, response: &AgentResponse, memory: &SharedMemoryHandle) {
        if response.success {
            for key in [agent_output_key(task.agent_type), task_output_key(&task.task_id)] {
                if let Err(e) = memory.set(&key, &response.content).await {
                    tracing::warn!(key, error = %e, "Failed to write agent output to shared memory");
                }
            }
            memory
                .publish(
                    EVENT_TASK_COMPLETED,
                    json!({
                        "task_id": task.task_id,
                        "duration_ms": response.execution_time_ms,
                        "tools": response.tools_invoked,
                    }),
                )
                .await;
        } else {
            memory
                .publish(
                    EVENT_TASK_FAILED,
                    json!({
                        "task_id": task.task_id,
                        "critical": task.is_critical,
                        "errors": response.errors,
                    }),
                )
                .await;
        }

        let last_task = json!({
            "task_id": task.task_id,
            "success": response.success,
            "execution_time_ms": response.execution_time_ms,
        });
        self.agent_states
            .set_data(&task.conversation_id, task.agent_type, "last_task", &last_task)
            .await;
    }

    /// 严格按列表顺序执行；前一个任务的黑板写入在下一个任务开始前已完成
    pub(super) async fn run_sequential(
        &self,
        tasks: &[AgentTask],
        memory: &SharedMemoryHandle,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for task in tasks {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let Some(response) = self.dispatch_task(task, memory, cancel).await else {
                outcome.cancelled = true;
                break;
            };
            outcome.calls += 1;
            outcome.invoked.push(task.agent_type);
            let critical_failure = !response.success && task.is_critical;
            outcome.responses.push(response);

            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            if critical_failure {
                tracing::warn!(task_id = %task.task_id, agent = %task.agent_type, "Critical task failed, stopping dispatch");
                outcome.aborted_after = Some(task.task_id.clone());
                break;
            }
        }
        outcome
    }

    /// 有界并发执行全部任务；关键任务失败不影响已派发的兄弟任务
    pub(super) async fn run_parallel(
        &self,
        tasks: &[AgentTask],
        memory: &SharedMemoryHandle,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for response in self.dispatch_concurrent(tasks, memory, cancel).await.into_iter().flatten() {
            outcome.calls += 1;
            outcome.invoked.push(response.agent_type);
            outcome.responses.push(response);
        }
        outcome.cancelled = cancel.is_cancelled();
        outcome
    }

    /// 多轮协作：每轮先读取同伴上一轮的产出，再并发派发，最后写回黑板。
    /// 某一轮没有产生任何内容变化的写入，或达到轮数上限时结束。
    pub(super) async fn run_collaborative(
        &self,
        tasks: &[AgentTask],
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let max_rounds = self.settings.max_collaboration_rounds.max(1);
        let mut outcome = RunOutcome::default();
        let mut latest: Vec<Option<AgentResponse>> = vec![None; tasks.len()];

        for round in 1..=max_rounds {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            // 每轮独立计数
            let memory = self.shared.handle(conversation_id, None);
            let Some(refined) = until_cancelled(cancel, refine_for_round(tasks, round, &memory)).await
            else {
                outcome.cancelled = true;
                break;
            };
            let slots = self.dispatch_concurrent(&refined, &memory, cancel).await;
            outcome.rounds = round;

            let mut critical_failure = false;
            for (i, slot) in slots.into_iter().enumerate() {
                if let Some(response) = slot {
                    outcome.calls += 1;
                    outcome.invoked.push(response.agent_type);
                    critical_failure |= !response.success && tasks[i].is_critical;
                    latest[i] = Some(response);
                }
            }

            let changed = memory.changed_writes();
            let round_completed =
                memory.publish(EVENT_ROUND_COMPLETED, json!({ "round": round, "changed_writes": changed }));
            until_cancelled(cancel, round_completed).await;
            tracing::info!(conversation_id, round, changed, "Collaboration round completed");

            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            if critical_failure {
                tracing::warn!(conversation_id, round, "Critical task failed, ending collaboration");
                break;
            }
            if changed == 0 {
                tracing::debug!(conversation_id, round, "Collaboration converged");
                break;
            }
        }

        outcome.responses = latest.into_iter().flatten().collect();
        outcome
    }

    /// 并发派发；许可按优先级从高到低发放，结果按原任务下标返回（None 表示因取消未派发）
    async fn dispatch_concurrent(
        &self,
        tasks: &[AgentTask],
        memory: &SharedMemoryHandle,
        cancel: &CancellationToken,
    ) -> Vec<Option<AgentResponse>> {
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        order.sort_by_key(|&i| Reverse(tasks[i].priority));

        let futures = order.into_iter().map(move |i| async move {
            let task = &tasks[i];
            let Some(_permit) = self.scheduler.acquire().await else {
                return (i, Some(AgentResponse::failure(task, "dispatch scheduler closed")));
            };
            if cancel.is_cancelled() {
                return (i, None);
            }
            (i, self.dispatch_task(task, memory, cancel).await)
        });

        let mut slots: Vec<Option<AgentResponse>> = vec![None; tasks.len()];
        for (i, response) in join_all(futures).await {
            slots[i] = response;
        }
        slots
    }
}

/// 为本轮任务注入轮次与同伴产出（不含自身）
async fn refine_for_round(tasks: &[AgentTask], round: usize, memory: &SharedMemoryHandle) -> Vec<AgentTask> {
    let mut agents: Vec<AgentType> = tasks.iter().map(|t| t.agent_type).collect();
    agents.sort();
    agents.dedup();

    let mut outputs: HashMap<AgentType, String> = HashMap::new();
    for agent in agents {
        if let Some(content) = memory.peer_output(agent).await {
            outputs.insert(agent, content);
        }
    }

    tasks
        .iter()
        .map(|task| {
            let peers: Map<String, Value> = outputs
                .iter()
                .filter(|(agent, _)| **agent != task.agent_type)
                .map(|(agent, content)| (agent.to_string(), Value::from(content.as_str())))
                .collect();
            task.clone()
                .with_parameter(PARAM_COLLABORATION_ROUND, round)
                .with_parameter(PARAM_PEER_OUTPUTS, Value::Object(peers))
        })
        .collect()
}
