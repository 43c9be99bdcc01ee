//! 任务调度：派发并发限制
//!
//! Parallel / Collaborative 模式下每个任务执行前先获取许可；Semaphore 是公平的，
//! 许可按请求顺序发放，因此调用方可以用提交顺序表达优先级。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// 获取派发许可；信号量关闭时返回 None
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 当前空闲的许可数
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
