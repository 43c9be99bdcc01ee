//! 规划器边界：执行计划类型、Planner trait 与固定计划实现

pub mod fixed;
pub mod plan;
pub mod traits;

pub use fixed::StaticPlanner;
pub use plan::{ExecutionPattern, ExecutionPlan};
pub use traits::{Planner, PlanningContext};
