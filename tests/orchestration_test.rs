//! 编排集成测试：固定计划规划器 + 脚本化 Agent，不依赖任何模型或网络

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use orchestra::agents::{AgentResponse, AgentTask, AgentType, CapabilityAgent, EchoAgent};
    use orchestra::config::AppConfig;
    use orchestra::core::{OrchestraError, StateError};
    use orchestra::orchestrator::{Orchestrator, OrchestratorBuilder};
    use orchestra::planner::{ExecutionPattern, ExecutionPlan, Planner, PlanningContext, StaticPlanner};
    use orchestra::state::{
        ConversationStatus, InMemoryStateStore, Role, SharedMemoryHandle, StateStore,
    };
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    /// 按脚本行为响应的 Agent；clone 共享调用计数与参数记录
    #[derive(Clone)]
    struct ScriptedAgent {
        agent_type: AgentType,
        fail: bool,
        delay: Duration,
        required: &'static [&'static str],
        reads_peer: Option<AgentType>,
        vary_by_round: bool,
        cancel_on_call: Option<CancellationToken>,
        calls: Arc<AtomicUsize>,
        params_seen: Arc<Mutex<Vec<HashMap<String, Value>>>>,
    }

    impl ScriptedAgent {
        fn new(agent_type: AgentType) -> Self {
            Self {
                agent_type,
                fail: false,
                delay: Duration::ZERO,
                required: &[],
                reads_peer: None,
                vary_by_round: false,
                cancel_on_call: None,
                calls: Arc::new(AtomicUsize::new(0)),
                params_seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn requires(mut self, params: &'static [&'static str]) -> Self {
            self.required = params;
            self
        }

        fn reads(mut self, peer: AgentType) -> Self {
            self.reads_peer = Some(peer);
            self
        }

        fn varies_by_round(mut self) -> Self {
            self.vary_by_round = true;
            self
        }

        fn cancels(mut self, token: CancellationToken) -> Self {
            self.cancel_on_call = Some(token);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn params(&self) -> Vec<HashMap<String, Value>> {
            self.params_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CapabilityAgent for ScriptedAgent {
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        fn required_parameters(&self) -> &[&str] {
            self.required
        }

        async fn process(
            &self,
            task: &AgentTask,
            memory: &SharedMemoryHandle,
            _cancel: CancellationToken,
        ) -> AgentResponse {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.params_seen.lock().unwrap().push(task.parameters.clone());
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return AgentResponse::failure(task, format!("{} exploded", self.agent_type));
            }

            let mut content = format!("{} done", task.description);
            if let Some(peer) = self.reads_peer {
                if let Some(output) = memory.peer_output(peer).await {
                    content = format!("{} after [{}]", content, output);
                }
            }
            if self.vary_by_round {
                let round = task
                    .parameters
                    .get("collaboration_round")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                content = format!("{} (round {})", content, round);
            }
            AgentResponse::success(task, content).with_metadata("calls", n)
        }
    }

    fn build(planner: StaticPlanner, agents: &[&ScriptedAgent], config: AppConfig) -> Orchestrator {
        let mut builder = OrchestratorBuilder::new(config).with_planner(planner);
        for agent in agents {
            builder = builder.with_agent((*agent).clone());
        }
        builder.build().unwrap()
    }

    fn task(agent: AgentType, id: &str) -> AgentTask {
        AgentTask::new(agent, format!("task {}", id), "c1").with_id(id)
    }

    #[tokio::test]
    async fn test_sequential_critical_failure_stops_dispatch() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let b = ScriptedAgent::new(AgentType::Compliance).failing();
        let c = ScriptedAgent::new(AgentType::CostManagement);
        let orch = build(StaticPlanner::new(), &[&a, &b, &c], AppConfig::default());

        let plan = ExecutionPlan::new("audit", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a").critical())
            .with_task(task(AgentType::Compliance, "b").critical())
            .with_task(task(AgentType::CostManagement, "c"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(c.calls(), 0);
        assert!(!resp.success);
        assert!(!resp.cancelled);
        assert_eq!(
            resp.agents_invoked,
            vec![AgentType::Infrastructure, AgentType::Compliance]
        );
        assert_eq!(resp.total_agent_calls, 2);
        assert!(resp.errors.iter().any(|e| e.contains("compliance (b)")));
        assert_eq!(resp.metadata["orchestrator.aborted_after"], Value::from("b"));
    }

    #[tokio::test]
    async fn test_parallel_non_critical_failure_keeps_siblings() {
        let a = ScriptedAgent::new(AgentType::Infrastructure).slow(Duration::from_millis(20));
        let b = ScriptedAgent::new(AgentType::Compliance).failing();
        let c = ScriptedAgent::new(AgentType::CostManagement);
        let orch = build(StaticPlanner::new(), &[&a, &b, &c], AppConfig::default());

        let plan = ExecutionPlan::new("status", ExecutionPattern::Parallel)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Compliance, "b"))
            .with_task(task(AgentType::CostManagement, "c"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.agents_invoked.len(), 3);
        assert!(resp.success);
        assert!(resp
            .errors
            .iter()
            .any(|e| e == "compliance (b): compliance exploded"));
        // 报告顺序与完成顺序无关
        assert_eq!(
            resp.final_response,
            "[infrastructure]\ntask a done\n\n[cost_management]\ntask c done"
        );
    }

    #[tokio::test]
    async fn test_cancellation_before_dispatch() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let plan = ExecutionPlan::new("status", ExecutionPattern::Parallel)
            .with_task(task(AgentType::Infrastructure, "a"));
        let orch = build(StaticPlanner::always(plan), &[&a], AppConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let resp = tokio::time::timeout(Duration::from_secs(1), orch.handle("c1", "status?", cancel))
            .await
            .unwrap()
            .unwrap();

        assert!(resp.cancelled);
        assert!(resp.agents_invoked.is_empty());
        assert_eq!(a.calls(), 0);

        // 取消的轮次不写入历史
        let messages = orch.conversations().get_messages("c1", None).await;
        assert!(messages.is_empty());
    }

    /// 指定前缀的键读写永远挂起，其余委托给内存存储
    struct HangingStore {
        inner: InMemoryStateStore,
        prefix: &'static str,
    }

    impl HangingStore {
        fn new(prefix: &'static str) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryStateStore::new(),
                prefix,
            })
        }

        async fn gate(&self, key: &str) {
            if key.starts_with(self.prefix) {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait]
    impl StateStore for HangingStore {
        async fn get_raw(&self, key: &str) -> Result<Option<String>, StateError> {
            self.gate(key).await;
            self.inner.get_raw(key).await
        }

        async fn set_raw(
            &self,
            key: &str,
            value: String,
            expiration: Option<Duration>,
        ) -> Result<(), StateError> {
            self.gate(key).await;
            self.inner.set_raw(key, value, expiration).await
        }

        async fn remove(&self, key: &str) -> Result<bool, StateError> {
            self.gate(key).await;
            self.inner.remove(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StateError> {
            self.inner.exists(key).await
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError> {
            self.inner.keys(pattern).await
        }

        async fn clear(&self, pattern: &str) -> Result<usize, StateError> {
            self.inner.clear(pattern).await
        }
    }

    fn build_with_store(
        planner: StaticPlanner,
        agents: &[&ScriptedAgent],
        store: Arc<HangingStore>,
    ) -> Orchestrator {
        let mut builder = OrchestratorBuilder::new(AppConfig::default())
            .with_planner(planner)
            .with_store(store);
        for agent in agents {
            builder = builder.with_agent((*agent).clone());
        }
        builder.build().unwrap()
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_releases_handle_blocked_on_conversation_store() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let plan = ExecutionPlan::new("status", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"));
        let orch = build_with_store(StaticPlanner::always(plan), &[&a], HangingStore::new("conversation:"));

        let cancel = cancel_after(Duration::from_millis(50));
        let resp = tokio::time::timeout(Duration::from_secs(1), orch.handle("c1", "status?", cancel))
            .await
            .expect("handle should return promptly after cancel")
            .unwrap();

        assert!(resp.cancelled);
        assert!(!resp.success);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_dispatch_blocked_on_event_log() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let b = ScriptedAgent::new(AgentType::Monitoring);
        let orch = build_with_store(StaticPlanner::new(), &[&a, &b], HangingStore::new("events:"));

        let plan = ExecutionPlan::new("status", ExecutionPattern::Parallel)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Monitoring, "b"));
        let cancel = cancel_after(Duration::from_millis(50));
        let resp = tokio::time::timeout(Duration::from_secs(1), orch.execute_plan("c1", plan, cancel))
            .await
            .expect("execute_plan should return promptly after cancel")
            .unwrap();

        assert!(resp.cancelled);
        // task_started 事件未写入，Agent 从未被调用
        assert!(resp.agents_invoked.is_empty());
        assert_eq!(resp.total_agent_calls, 0);
        assert_eq!(a.calls() + b.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_mid_sequence_stops_new_dispatches() {
        let cancel = CancellationToken::new();
        let a = ScriptedAgent::new(AgentType::Infrastructure).cancels(cancel.clone());
        let b = ScriptedAgent::new(AgentType::Monitoring);
        let orch = build(StaticPlanner::new(), &[&a, &b], AppConfig::default());

        let plan = ExecutionPlan::new("status", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Monitoring, "b"));
        let resp = orch.execute_plan("c1", plan, cancel).await.unwrap();

        assert!(resp.cancelled);
        assert!(!resp.success);
        assert_eq!(resp.agents_invoked, vec![AgentType::Infrastructure]);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_follow_up_skips_only_underspecified_tasks() {
        let a = ScriptedAgent::new(AgentType::Infrastructure).requires(&["region"]);
        let b = ScriptedAgent::new(AgentType::Monitoring);
        let orch = build(StaticPlanner::new(), &[&a, &b], AppConfig::default());

        let plan = ExecutionPlan::new("status", ExecutionPattern::Parallel)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Monitoring, "b"));
        let resp = orch
            .execute_plan("c1", plan.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.requires_follow_up);
        assert_eq!(resp.missing_fields, vec!["region".to_string()]);
        assert!(resp.follow_up_prompt.as_deref().unwrap().contains("region"));
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
        assert_eq!(resp.agents_invoked, vec![AgentType::Monitoring]);

        // 会话变量补齐后任务即可派发
        orch.conversations().set_variable("c1", "region", "eu-west-1").await;
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();
        assert!(!resp.requires_follow_up);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_task_timeout_is_recorded_as_failure() {
        let fast = ScriptedAgent::new(AgentType::Infrastructure);
        let slow = ScriptedAgent::new(AgentType::Monitoring).slow(Duration::from_secs(5));
        let orch = build(StaticPlanner::new(), &[&fast, &slow], AppConfig::default());

        let plan = ExecutionPlan::new("status", ExecutionPattern::Parallel)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Monitoring, "b").with_timeout_secs(1));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.success);
        assert!(resp
            .errors
            .iter()
            .any(|e| e == "monitoring (b): timed out after 1s"));
        assert_eq!(resp.total_agent_calls, 2);
    }

    #[tokio::test]
    async fn test_critical_timeout_aborts_sequence() {
        let slow = ScriptedAgent::new(AgentType::Security).slow(Duration::from_secs(5));
        let next = ScriptedAgent::new(AgentType::Compliance);
        let orch = build(StaticPlanner::new(), &[&slow, &next], AppConfig::default());

        let plan = ExecutionPlan::new("scan", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Security, "a").critical().with_timeout_secs(1))
            .with_task(task(AgentType::Compliance, "b"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert!(!resp.success);
        assert_eq!(next.calls(), 0);
        assert_eq!(resp.agents_invoked, vec![AgentType::Security]);
    }

    #[tokio::test]
    async fn test_collaborative_stops_when_round_writes_nothing_new() {
        let a = ScriptedAgent::new(AgentType::Security);
        let b = ScriptedAgent::new(AgentType::Compliance);
        let orch = build(StaticPlanner::new(), &[&a, &b], AppConfig::default());

        let plan = ExecutionPlan::new("review", ExecutionPattern::Collaborative)
            .with_task(task(AgentType::Security, "a"))
            .with_task(task(AgentType::Compliance, "b"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.success);
        assert_eq!(resp.metadata["orchestrator.rounds"], Value::from(2));
        assert_eq!(resp.total_agent_calls, 4);
        assert_eq!(resp.agents_invoked, vec![AgentType::Security, AgentType::Compliance]);

        // 第二轮能看到同伴第一轮的产出
        let params = a.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1]["collaboration_round"], Value::from(2));
        assert_eq!(params[1]["peer_outputs"]["compliance"], Value::from("task b done"));
        assert!(params[1]["peer_outputs"].get("security").is_none());
    }

    #[tokio::test]
    async fn test_collaborative_respects_round_cap() {
        let a = ScriptedAgent::new(AgentType::Security).varies_by_round();
        let b = ScriptedAgent::new(AgentType::Compliance);
        let orch = build(StaticPlanner::new(), &[&a, &b], AppConfig::default());

        let plan = ExecutionPlan::new("review", ExecutionPattern::Collaborative)
            .with_task(task(AgentType::Security, "a"))
            .with_task(task(AgentType::Compliance, "b"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.metadata["orchestrator.rounds"], Value::from(3));
        assert_eq!(resp.total_agent_calls, 6);
        assert!(resp.final_response.contains("(round 3)"));

        let events = orch.shared_memory().get_events("c1", 100).await;
        let rounds = events
            .iter()
            .filter(|e| e.event_type == "round_completed")
            .count();
        assert_eq!(rounds, 3);
    }

    #[tokio::test]
    async fn test_invalid_plan_degrades_to_fallback() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let plan = ExecutionPlan::new("mystery", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::Unknown, "b"));
        let orch = build(StaticPlanner::always(plan.clone()), &[&a], AppConfig::default());

        let err = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestraError::UnknownAgent(AgentType::Unknown)));

        let resp = orch
            .handle("c1", "do the thing", CancellationToken::new())
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.primary_intent, "mystery");
        assert!(resp.agents_invoked.is_empty());
        assert!(resp.errors[0].contains("unregistered agent"));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_pattern_is_rejected() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let orch = build(StaticPlanner::new(), &[&a], AppConfig::default());
        let plan = ExecutionPlan::new("x", ExecutionPattern::Unsupported)
            .with_task(task(AgentType::Infrastructure, "a"));
        let err = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestraError::UnsupportedPattern));
    }

    #[tokio::test]
    async fn test_conversational_plan_and_missing_fallback() {
        let orch = build(
            StaticPlanner::always(ExecutionPlan::conversational("chat", "Hello!")),
            &[],
            AppConfig::default(),
        );
        let resp = orch
            .handle("c1", "hi", CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.final_response, "Hello!");
        assert_eq!(resp.total_agent_calls, 0);

        let mut config = AppConfig::default();
        config.orchestrator.fallback_response = None;
        let orch = build(StaticPlanner::new(), &[], config);
        let err = orch
            .handle("c2", "hi", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestraError::Planning(_)));
    }

    #[tokio::test]
    async fn test_handle_records_exchange_in_history() {
        let plan = ExecutionPlan::new("inventory", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"));
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_planner(StaticPlanner::always(plan))
            .with_agent(EchoAgent::new(AgentType::Infrastructure))
            .build()
            .unwrap();

        let resp = orch
            .handle("c1", "what is running?", CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.final_response, "task a");
        assert_eq!(resp.metadata["infrastructure.data"]["description"], Value::from("task a"));

        let state = orch.conversations().get("c1").await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages[0].content, "what is running?");
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert_eq!(state.messages[1].agent_type, Some(AgentType::Infrastructure));
        assert_eq!(state.active_agent_type, Some(AgentType::Infrastructure));
    }

    /// 记录收到的规划上下文，返回会话型回复
    #[derive(Default)]
    struct RecordingPlanner {
        seen: Mutex<Vec<PlanningContext>>,
    }

    #[async_trait]
    impl Planner for RecordingPlanner {
        async fn plan(
            &self,
            _message: &str,
            _conversation_id: &str,
            context: &PlanningContext,
            _cancel: CancellationToken,
        ) -> Result<ExecutionPlan, OrchestraError> {
            self.seen.lock().unwrap().push(context.clone());
            Ok(ExecutionPlan::conversational("chat", "hello"))
        }
    }

    #[tokio::test]
    async fn test_planner_sees_agent_descriptions_and_history() {
        let planner = Arc::new(RecordingPlanner::default());
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_planner_arc(planner.clone())
            .with_agent(EchoAgent::new(AgentType::Monitoring))
            .with_agent(EchoAgent::new(AgentType::Infrastructure))
            .build()
            .unwrap();

        orch.handle("c1", "hi", CancellationToken::new()).await.unwrap();
        orch.handle("c1", "again", CancellationToken::new()).await.unwrap();

        let seen = planner.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let types: Vec<AgentType> = seen[0].available_agents.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![AgentType::Infrastructure, AgentType::Monitoring]);
        assert!(seen[0].available_agents.iter().all(|(_, d)| !d.is_empty()));
        assert!(seen[0].recent_messages.is_empty());
        assert_eq!(seen[1].recent_messages.len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_tasks_see_earlier_outputs() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let b = ScriptedAgent::new(AgentType::CostManagement).reads(AgentType::Infrastructure);
        let orch = build(StaticPlanner::new(), &[&a, &b], AppConfig::default());

        let plan = ExecutionPlan::new("cost", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"))
            .with_task(task(AgentType::CostManagement, "b"));
        let resp = orch
            .execute_plan("c1", plan, CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.final_response.contains("task b done after [task a done]"));

        let shared = orch.shared_memory();
        assert_eq!(
            shared.get::<String>("c1", "task_output:b").await.as_deref(),
            Some("task b done after [task a done]")
        );
        let events = shared.get_events("c1", 10).await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event_type, "task_completed");
        assert_eq!(events[0].source_agent, Some(AgentType::CostManagement));
        assert_eq!(events[3].event_type, "task_started");
        assert_eq!(events[3].source_agent, Some(AgentType::Infrastructure));

        let last: Value = orch
            .agent_states()
            .get_data("c1", AgentType::Infrastructure, "last_task")
            .await
            .unwrap();
        assert_eq!(last["success"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_end_conversation_tears_down_run_state() {
        let a = ScriptedAgent::new(AgentType::Infrastructure);
        let plan = ExecutionPlan::new("inventory", ExecutionPattern::Sequential)
            .with_task(task(AgentType::Infrastructure, "a"));
        let orch = build(StaticPlanner::always(plan), &[&a], AppConfig::default());

        orch.handle("c1", "list", CancellationToken::new()).await.unwrap();
        assert!(!orch.shared_memory().keys("c1").await.is_empty());

        orch.end_conversation("c1").await.unwrap();
        assert!(orch.shared_memory().keys("c1").await.is_empty());
        assert!(orch.shared_memory().get_events("c1", 10).await.is_empty());
        let state = orch.conversations().get("c1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Completed);
        assert_eq!(state.messages.len(), 2);
        assert!(orch.conversations().list_active().await.is_empty());
    }
}
