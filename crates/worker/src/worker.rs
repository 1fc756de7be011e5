//! 重试Worker契约
//!
//! 处理器通过注册表中的两个工厂函数创建：全新运行（[`FreshInit`]）与重试运行（[`RetryInit`]）。
//! 创建完成的Worker只依赖创建时捕获的状态执行 [`RetryableWorker::run`]。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use retry_domain::{ExecutionId, ExecutionRecord};
use retry_errors::{RetryError, RetryResult};

/// 全新运行的初始化参数
#[derive(Debug, Clone)]
pub struct FreshInit {
    pub execution: ExecutionRecord,
    pub record_ids: Vec<String>,
}

/// 重试运行的初始化参数
///
/// `parent` 是派发时已在内存中递增过重试计数的父执行记录，Worker完成后由后处理据此更新父记录。
#[derive(Debug, Clone)]
pub struct RetryInit {
    pub child: ExecutionRecord,
    pub record_ids: Vec<String>,
    pub parent: ExecutionRecord,
}

impl RetryInit {
    pub fn new(child: ExecutionRecord, parent: ExecutionRecord) -> Self {
        let record_ids = child.retry_id_set();
        Self {
            child,
            record_ids,
            parent,
        }
    }

    pub fn parent_id(&self) -> ExecutionId {
        self.parent.id
    }
}

/// Worker生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Initialized => "initialized",
            WorkerState::Running => "running",
            WorkerState::Completed => "completed",
            WorkerState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (WorkerState::Initialized, WorkerState::Running)
                | (WorkerState::Running, WorkerState::Completed)
                | (WorkerState::Running, WorkerState::Failed)
        )
    }

    pub fn transition(self, next: WorkerState) -> RetryResult<WorkerState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RetryError::Internal(format!(
                "无效的Worker状态转换: {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个业务记录的外呼结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordOutcome {
    pub record_id: String,
    pub success: bool,
    pub status_code: Option<u16>,
    /// 原始请求内容，供审计日志使用
    pub request: Option<String>,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn succeeded<S: Into<String>>(record_id: S, status_code: Option<u16>) -> Self {
        Self {
            record_id: record_id.into(),
            success: true,
            status_code,
            request: None,
            response: None,
            error: None,
        }
    }

    pub fn failed<S: Into<String>, E: Into<String>>(
        record_id: S,
        status_code: Option<u16>,
        error: E,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            success: false,
            status_code,
            request: None,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn with_payloads(mut self, request: Option<String>, response: Option<String>) -> Self {
        self.request = request;
        self.response = response;
        self
    }
}

/// Worker运行结束后返回的报告
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl WorkerReport {
    pub fn new(outcomes: Vec<RecordOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    /// 仍然失败、需要在后续周期继续重试的业务记录ID
    pub fn failed_record_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.record_id.clone())
            .collect()
    }

    /// 最后一个失败结果的状态码
    pub fn last_failure_status(&self) -> Option<u16> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| !o.success)
            .and_then(|o| o.status_code)
    }

    /// 所有外部调用都已返回后才能确定的终态
    pub fn final_state(&self) -> WorkerState {
        if self.all_succeeded() {
            WorkerState::Completed
        } else {
            WorkerState::Failed
        }
    }
}

/// 重试处理器需要实现的能力
///
/// `run` 内部的单条记录失败应体现在返回的 [`WorkerReport`] 中；
/// 返回 `Err` 表示整个Worker失败，由宿主捕获并记录，不会影响其他Worker。
#[async_trait]
pub trait RetryableWorker: Send {
    fn handler_name(&self) -> &str;

    async fn run(&mut self) -> RetryResult<WorkerReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = WorkerState::Initialized;
        let running = state.transition(WorkerState::Running).unwrap();
        assert_eq!(running.transition(WorkerState::Completed).unwrap(), WorkerState::Completed);
        assert_eq!(running.transition(WorkerState::Failed).unwrap(), WorkerState::Failed);

        assert!(WorkerState::Initialized.transition(WorkerState::Completed).is_err());
        assert!(WorkerState::Completed.transition(WorkerState::Running).is_err());
        assert!(WorkerState::Failed.transition(WorkerState::Completed).is_err());
    }

    #[test]
    fn test_report_final_state_waits_for_every_outcome() {
        let report = WorkerReport::new(vec![
            RecordOutcome::succeeded("a", Some(200)),
            RecordOutcome::failed("b", Some(503), "unavailable"),
            RecordOutcome::succeeded("c", Some(201)),
        ]);
        assert_eq!(report.final_state(), WorkerState::Failed);
        assert_eq!(report.failed_record_ids(), vec!["b"]);
        assert_eq!(report.last_failure_status(), Some(503));

        let ok = WorkerReport::new(vec![RecordOutcome::succeeded("a", Some(200))]);
        assert_eq!(ok.final_state(), WorkerState::Completed);
        assert!(ok.failed_record_ids().is_empty());
    }

    #[test]
    fn test_retry_init_uses_child_record_ids() {
        let mut parent = ExecutionRecord::new(1, vec!["x".into(), "y".into(), "x".into()]);
        parent.id = 9;
        let child = parent.spawn_retry_child();
        let init = RetryInit::new(child, parent);
        assert_eq!(init.record_ids, vec!["x", "y"]);
        assert_eq!(init.parent_id(), 9);
        assert_eq!(init.child.retry_from, Some(9));
    }
}
