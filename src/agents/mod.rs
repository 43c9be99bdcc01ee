//! 能力 Agent：任务 / 响应契约、Agent trait 与注册表

pub mod echo;
pub mod registry;
pub mod types;

pub use echo::EchoAgent;
pub use registry::{AgentRegistry, CapabilityAgent};
pub use types::{AgentResponse, AgentTask, AgentType};
