//! 核心层：错误分类与派发并发控制

pub mod error;
pub mod task_scheduler;

pub use error::{OrchestraError, StateError, TransitionError};
pub use task_scheduler::TaskScheduler;
