//! Orchestra 演示入口
//!
//! 初始化日志、加载配置、注册 Echo Agent 与固定计划规划器，处理命令行传入的一条消息，
//! 并以 JSON 输出编排结果。用法：`orchestra [--config path] <message...>`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use orchestra::agents::{AgentTask, AgentType, EchoAgent};
use orchestra::orchestrator::create_orchestrator_builder;
use orchestra::planner::{ExecutionPattern, ExecutionPlan, StaticPlanner};
use orchestra::state::InMemoryStateStore;
use tokio_util::sync::CancellationToken;

const DEMO_CONVERSATION: &str = "demo";

fn demo_planner() -> StaticPlanner {
    let status = ExecutionPlan::new("environment status", ExecutionPattern::Parallel)
        .with_task(AgentTask::new(AgentType::Infrastructure, "List running resources", DEMO_CONVERSATION))
        .with_task(AgentTask::new(AgentType::Monitoring, "Summarize open alerts", DEMO_CONVERSATION))
        .with_task(AgentTask::new(AgentType::CostManagement, "Report month-to-date spend", DEMO_CONVERSATION))
        .with_estimated_time(5);
    let review = ExecutionPlan::new("security review", ExecutionPattern::Collaborative)
        .with_task(AgentTask::new(AgentType::Security, "Assess exposure", DEMO_CONVERSATION).critical())
        .with_task(AgentTask::new(AgentType::Compliance, "Check policy drift", DEMO_CONVERSATION));
    let audit = ExecutionPlan::new("audit", ExecutionPattern::Sequential)
        .with_task(AgentTask::new(AgentType::Documentation, "Collect runbooks", DEMO_CONVERSATION))
        .with_task(AgentTask::new(AgentType::Compliance, "Evaluate controls", DEMO_CONVERSATION).critical());

    StaticPlanner::new()
        .route("status", status)
        .route("review", review)
        .route("audit", audit)
        .otherwise(ExecutionPlan::conversational(
            "chat",
            "Try asking for a status report, a security review or an audit.",
        ))
}

fn parse_args() -> (Option<PathBuf>, String) {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut words = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next().map(PathBuf::from);
        } else {
            words.push(arg);
        }
    }
    (config_path, words.join(" "))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orchestra::observability::init();

    let (config_path, message) = parse_args();
    let message = if message.trim().is_empty() {
        "status".to_string()
    } else {
        message
    };

    let builder = create_orchestrator_builder(config_path);
    let shutdown = CancellationToken::new();
    let store = Arc::new(InMemoryStateStore::new());
    let sweeper = builder
        .config()
        .state
        .cleanup_interval()
        .map(|interval| store.spawn_sweeper(interval, shutdown.clone()));

    let mut builder = builder.with_store(store).with_planner(demo_planner());
    for agent in [
        AgentType::Infrastructure,
        AgentType::Monitoring,
        AgentType::CostManagement,
        AgentType::Security,
        AgentType::Compliance,
        AgentType::Documentation,
    ] {
        builder = builder.with_agent(EchoAgent::new(agent).with_prefix(agent.as_str()));
    }
    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    // Ctrl-C 取消当前请求
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    if let Ok(user) = std::env::var("USER") {
        orchestrator.conversations().set_user(DEMO_CONVERSATION, &user).await;
    }
    let response = orchestrator
        .handle(DEMO_CONVERSATION, &message, cancel)
        .await
        .context("Orchestration failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to encode response")?
    );

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
    Ok(())
}
