//! Orchestra - 多智能体编排与跨 Agent 状态协调引擎
//!
//! 模块划分：
//! - **agents**: 任务 / 响应契约、能力 Agent trait 与注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、派发并发控制
//! - **observability**: 日志初始化
//! - **orchestrator**: 计划校验、按模式派发、追问检测、结果合成
//! - **planner**: 执行计划与规划器边界
//! - **state**: 键值存储抽象、会话状态、Agent 工作状态、共享内存

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod orchestrator;
pub mod planner;
pub mod state;

pub use orchestrator::{OrchestratedResponse, Orchestrator, OrchestratorBuilder};
