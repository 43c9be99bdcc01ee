//! 状态层：可插拔键值存储，以及建立在其上的会话状态、Agent 工作状态与共享内存

pub mod agent;
pub mod conversation;
pub mod locks;
pub mod memory;
pub mod shared;
pub mod store;

pub use agent::{
    ActionStatus, AgentState, AgentStateManager, PendingAction, ToolExecutionResult,
    WorkflowState, WorkflowStatus, DEFAULT_ACTION_TTL,
};
pub use conversation::{
    ConversationState, ConversationStateManager, ConversationStatus, ConversationSummary, Message,
    Role, DEFAULT_MAX_MESSAGES,
};
pub use locks::KeyedLocks;
pub use memory::InMemoryStateStore;
pub use shared::{
    agent_output_key, task_output_key, SharedMemory, SharedMemoryEvent, SharedMemoryHandle,
    DEFAULT_MAX_EVENTS,
};
pub use store::{glob_to_regex, StateStore, StateStoreExt};
