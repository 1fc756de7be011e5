//! Worker完成后的持久化
//!
//! 派发阶段只在内存中递增父记录的重试计数并构造子记录，真正的写入在这里完成，
//! 且只发生在Worker的所有外部调用都已返回之后。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::job::WorkerCompletion;
use crate::worker::WorkerState;
use retry_domain::{ExecutionRecord, ExecutionRepository, ExecutionStatus};
use retry_errors::{RetryError, RetryResult};

#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    async fn record(&self, completion: &WorkerCompletion) -> RetryResult<()>;
}

/// 基于执行记录仓储的后处理
pub struct RepositoryOutcomeRecorder {
    executions: Arc<dyn ExecutionRepository>,
}

impl RepositoryOutcomeRecorder {
    pub fn new(executions: Arc<dyn ExecutionRepository>) -> Self {
        Self { executions }
    }

    fn build_child(completion: &WorkerCompletion) -> ExecutionRecord {
        let mut child = completion.child.clone();
        child.status = match completion.state {
            WorkerState::Completed => ExecutionStatus::Completed,
            _ => ExecutionStatus::Failed,
        };
        if let Some(report) = &completion.report {
            child.retry_ids = report.failed_record_ids();
            child.last_status_code = report.last_failure_status();
        }
        child.last_attempt_at = Some(completion.finished_at);
        child.updated_at = Utc::now();
        child
    }

    /// 以仓储中的最新状态为基础合并本次重试的结果
    fn merge_parent(current: &mut ExecutionRecord, completion: &WorkerCompletion) {
        current.retries_attempted = current
            .retries_attempted
            .max(completion.parent.retries_attempted);
        current.last_attempt_at = Some(completion.finished_at);

        if let Some(report) = &completion.report {
            let succeeded: HashSet<&str> = report
                .outcomes
                .iter()
                .filter(|o| o.success)
                .map(|o| o.record_id.as_str())
                .collect();
            current
                .retry_ids
                .retain(|id| !succeeded.contains(id.trim()));
            if let Some(code) = report.last_failure_status() {
                current.last_status_code = Some(code);
            }
        }

        if !current.is_retryable() {
            current.retry_ids.clear();
            current.status = ExecutionStatus::Completed;
        }
        current.updated_at = Utc::now();
    }
}

#[async_trait]
impl OutcomeRecorder for RepositoryOutcomeRecorder {
    async fn record(&self, completion: &WorkerCompletion) -> RetryResult<()> {
        let child = self.executions.create(&Self::build_child(completion)).await?;
        debug!(
            child.id = child.id,
            parent.id = completion.parent.id,
            status = %child.status,
            "子执行记录已保存"
        );

        let parent_id = completion.parent.id;
        let mut parent = self
            .executions
            .get_by_id(parent_id)
            .await?
            .ok_or(RetryError::ExecutionNotFound { id: parent_id })?;
        Self::merge_parent(&mut parent, completion);
        self.executions.update(&parent).await?;

        info!(
            parent.id = parent.id,
            retries_attempted = parent.retries_attempted,
            remaining = parent.retry_ids.len(),
            status = %parent.status,
            "父执行记录已更新"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobInfo;
    use crate::worker::{RecordOutcome, WorkerReport};
    use uuid::Uuid;

    fn completion(report: Option<WorkerReport>, state: WorkerState) -> WorkerCompletion {
        let mut parent = ExecutionRecord::new(3, vec!["a".into(), "b".into(), "c".into()]);
        parent.id = 42;
        parent.status = ExecutionStatus::Failed;
        parent.record_attempt();
        let child = parent.spawn_retry_child();
        WorkerCompletion {
            info: JobInfo {
                job_id: Uuid::new_v4(),
                handler: "test".into(),
                policy_id: 3,
                parent_id: 42,
            },
            parent,
            child,
            state,
            error: report.is_none().then(|| "boom".to_string()),
            report,
            finished_at: Utc::now(),
        }
    }

    fn stored_parent() -> ExecutionRecord {
        let mut parent = ExecutionRecord::new(3, vec!["a".into(), "b".into(), "c".into()]);
        parent.id = 42;
        parent.status = ExecutionStatus::Failed;
        parent
    }

    #[test]
    fn test_merge_parent_narrows_retry_ids() {
        let report = WorkerReport::new(vec![
            RecordOutcome::succeeded("a", Some(200)),
            RecordOutcome::failed("b", Some(503), "unavailable"),
            RecordOutcome::succeeded("c", Some(200)),
        ]);
        let completion = completion(Some(report), WorkerState::Failed);
        let mut parent = stored_parent();

        RepositoryOutcomeRecorder::merge_parent(&mut parent, &completion);
        assert_eq!(parent.retry_ids, vec!["b"]);
        assert_eq!(parent.retries_attempted, 1);
        assert_eq!(parent.last_status_code, Some(503));
        assert_eq!(parent.status, ExecutionStatus::Failed);
        assert!(parent.last_attempt_at.is_some());
    }

    #[test]
    fn test_merge_parent_completes_when_nothing_remains() {
        let report = WorkerReport::new(vec![
            RecordOutcome::succeeded("a", Some(200)),
            RecordOutcome::succeeded("b", Some(200)),
            RecordOutcome::succeeded("c", Some(200)),
        ]);
        let completion = completion(Some(report), WorkerState::Completed);
        let mut parent = stored_parent();

        RepositoryOutcomeRecorder::merge_parent(&mut parent, &completion);
        assert!(parent.retry_ids.is_empty());
        assert_eq!(parent.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_merge_parent_keeps_ids_when_worker_errored() {
        let completion = completion(None, WorkerState::Failed);
        let mut parent = stored_parent();

        RepositoryOutcomeRecorder::merge_parent(&mut parent, &completion);
        assert_eq!(parent.retry_ids, vec!["a", "b", "c"]);
        assert_eq!(parent.retries_attempted, 1);
        assert_eq!(parent.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_merge_parent_never_lowers_counter() {
        let completion = completion(None, WorkerState::Failed);
        let mut parent = stored_parent();
        parent.retries_attempted = 4;

        RepositoryOutcomeRecorder::merge_parent(&mut parent, &completion);
        assert_eq!(parent.retries_attempted, 4);
    }
}
