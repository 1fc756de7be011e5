use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::worker::{RetryableWorker, WorkerReport, WorkerState};
use retry_domain::{ExecutionId, ExecutionRecord};
use retry_errors::RetryResult;

/// 一个待异步执行的重试Worker
///
/// 持有派发预算的一个名额，Job被丢弃（调度失败或执行结束）时名额随之释放。
pub struct WorkerJob {
    pub id: Uuid,
    pub worker: Box<dyn RetryableWorker>,
    pub parent: ExecutionRecord,
    pub child: ExecutionRecord,
    slot: Option<OwnedSemaphorePermit>,
}

impl WorkerJob {
    pub fn new(
        worker: Box<dyn RetryableWorker>,
        parent: ExecutionRecord,
        child: ExecutionRecord,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker,
            parent,
            child,
            slot: None,
        }
    }

    pub fn with_slot(mut self, slot: OwnedSemaphorePermit) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            job_id: self.id,
            handler: self.worker.handler_name().to_string(),
            policy_id: self.parent.policy_id,
            parent_id: self.parent.id,
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Box<dyn RetryableWorker>,
        ExecutionRecord,
        ExecutionRecord,
        Option<OwnedSemaphorePermit>,
    ) {
        (self.worker, self.parent, self.child, self.slot)
    }
}

impl fmt::Debug for WorkerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerJob")
            .field("id", &self.id)
            .field("handler", &self.worker.handler_name())
            .field("parent_id", &self.parent.id)
            .field("holds_slot", &self.holds_slot())
            .finish()
    }
}

/// 审计与日志使用的Job摘要
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub job_id: Uuid,
    pub handler: String,
    pub policy_id: i64,
    pub parent_id: ExecutionId,
}

/// Worker到达终态后交给后处理的结果
#[derive(Debug, Clone)]
pub struct WorkerCompletion {
    pub info: JobInfo,
    pub parent: ExecutionRecord,
    pub child: ExecutionRecord,
    pub state: WorkerState,
    /// Worker返回错误或panic时为空
    pub report: Option<WorkerReport>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// 异步执行宿主的调度入口
#[async_trait]
pub trait WorkerScheduler: Send + Sync {
    /// 提交后立即返回，不等待Worker执行
    async fn schedule(&self, job: WorkerJob) -> RetryResult<Uuid>;
}
