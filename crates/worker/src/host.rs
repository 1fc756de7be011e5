//! Worker异步执行宿主
//!
//! 每个Job在独立的tokio任务中运行，panic与错误都在任务内部被捕获，不会影响派发器或其他Worker。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::job::{JobInfo, WorkerCompletion, WorkerJob, WorkerScheduler};
use crate::post_process::OutcomeRecorder;
use crate::worker::{WorkerReport, WorkerState};
use retry_errors::{RetryError, RetryResult};

struct TrackedJob {
    state: WorkerState,
    handle: Option<JoinHandle<()>>,
}

type JobTable = Arc<Mutex<HashMap<Uuid, TrackedJob>>>;

pub struct WorkerHost {
    audit: Arc<dyn AuditLog>,
    recorder: Option<Arc<dyn OutcomeRecorder>>,
    jobs: JobTable,
}

impl WorkerHost {
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self {
            audit,
            recorder: None,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OutcomeRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 尚未到达终态的Worker数量
    pub async fn in_flight(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn state_of(&self, job_id: Uuid) -> Option<WorkerState> {
        self.jobs.lock().await.get(&job_id).map(|job| job.state)
    }

    /// 等待所有Worker结束，超时返回false
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.jobs.lock().await.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// 中止所有仍在运行的Worker
    pub async fn abort_all(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let count = jobs.len();
        for (job_id, job) in jobs.drain() {
            if let Some(handle) = job.handle {
                warn!(job.id = %job_id, "中止未完成的Worker");
                handle.abort();
            }
        }
        count
    }

    async fn execute(
        job: WorkerJob,
        audit: Arc<dyn AuditLog>,
        recorder: Option<Arc<dyn OutcomeRecorder>>,
        jobs: JobTable,
    ) {
        let info = job.info();
        let (mut worker, parent, child, slot) = job.into_parts();

        Self::transition(&jobs, info.job_id, WorkerState::Running).await;
        debug!(job.id = %info.job_id, handler = %info.handler, parent.id = info.parent_id, "Worker开始执行");

        let outcome = AssertUnwindSafe(worker.run()).catch_unwind().await;
        let (report, failure) = match outcome {
            Ok(Ok(report)) => (Some(report), None),
            Ok(Err(e)) => (None, Some(e)),
            Err(panic) => (None, Some(RetryError::WorkerPanicked(panic_message(panic)))),
        };
        drop(worker);

        let state = Self::audit_outcome(&*audit, &info, report.as_ref(), failure.as_ref()).await;
        Self::transition(&jobs, info.job_id, state).await;

        let completion = WorkerCompletion {
            info: info.clone(),
            parent,
            child,
            state,
            report,
            error: failure.map(|e| e.to_string()),
            finished_at: Utc::now(),
        };

        if let Some(recorder) = recorder {
            if let Err(e) = recorder.record(&completion).await {
                error!(
                    job.id = %info.job_id,
                    parent.id = info.parent_id,
                    "Worker结果持久化失败: {}",
                    e
                );
            }
        }

        counter!("retry_workers_finished_total", "state" => state.as_str()).increment(1);
        info!(
            job.id = %info.job_id,
            handler = %info.handler,
            parent.id = info.parent_id,
            state = %state,
            "Worker执行结束"
        );

        drop(slot);
        jobs.lock().await.remove(&info.job_id);
    }

    async fn audit_outcome(
        audit: &dyn AuditLog,
        info: &JobInfo,
        report: Option<&WorkerReport>,
        failure: Option<&RetryError>,
    ) -> WorkerState {
        if let Some(error) = failure {
            audit.worker_failed(info, error).await;
            return WorkerState::Failed;
        }
        match report {
            Some(report) => {
                for outcome in &report.outcomes {
                    audit.record_outcome(info, outcome).await;
                }
                report.final_state()
            }
            None => WorkerState::Failed,
        }
    }

    async fn transition(jobs: &JobTable, job_id: Uuid, next: WorkerState) {
        let mut jobs = jobs.lock().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            match job.state.transition(next) {
                Ok(state) => job.state = state,
                Err(e) => warn!(job.id = %job_id, "{}", e),
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl WorkerScheduler for WorkerHost {
    async fn schedule(&self, job: WorkerJob) -> RetryResult<Uuid> {
        let job_id = job.id;
        let audit = Arc::clone(&self.audit);
        let recorder = self.recorder.clone();
        let table = Arc::clone(&self.jobs);

        // 持锁完成登记，保证任务内的状态更新一定发生在登记之后
        let mut jobs = self.jobs.lock().await;
        jobs.insert(
            job_id,
            TrackedJob {
                state: WorkerState::Initialized,
                handle: None,
            },
        );
        let handle = tokio::spawn(Self::execute(job, audit, recorder, table));
        if let Some(tracked) = jobs.get_mut(&job_id) {
            tracked.handle = Some(handle);
        }

        Ok(job_id)
    }
}
