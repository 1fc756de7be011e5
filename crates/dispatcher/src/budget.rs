use std::fmt;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 派发预算
///
/// 进程内共享的Worker名额。名额随Worker一起移交，Worker结束或候选被放弃时释放。
/// 获取名额从不等待，名额耗尽即触发溢出。
#[derive(Clone)]
pub struct DispatchBudget {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl DispatchBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// 检查并占用一个名额，没有可用名额时返回 `None`
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok();
        gauge!("retry_budget_available").set(self.available() as f64);
        permit
    }
}

impl fmt::Debug for DispatchBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchBudget")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
