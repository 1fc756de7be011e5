use async_trait::async_trait;
use tracing::{info, warn};

use crate::job::JobInfo;
use crate::worker::RecordOutcome;
use retry_errors::RetryError;

/// 审计日志
///
/// Worker的每个终态（成功、失败、错误或panic）都必须经过这里。
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_outcome(&self, job: &JobInfo, outcome: &RecordOutcome);

    async fn worker_failed(&self, job: &JobInfo, error: &RetryError);
}

/// 以结构化tracing事件输出审计记录
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record_outcome(&self, job: &JobInfo, outcome: &RecordOutcome) {
        if outcome.success {
            info!(
                target: "retry_audit",
                { job.id = %job.job_id,
                handler = %job.handler,
                policy.id = job.policy_id,
                parent.id = job.parent_id,
                record.id = %outcome.record_id,
                status_code = ?outcome.status_code,
                request = outcome.request.as_deref().unwrap_or(""),
                response = outcome.response.as_deref().unwrap_or("") },
                "记录重试成功"
            );
        } else {
            warn!(
                target: "retry_audit",
                { job.id = %job.job_id,
                handler = %job.handler,
                policy.id = job.policy_id,
                parent.id = job.parent_id,
                record.id = %outcome.record_id,
                status_code = ?outcome.status_code,
                error = outcome.error.as_deref().unwrap_or(""),
                request = outcome.request.as_deref().unwrap_or(""),
                response = outcome.response.as_deref().unwrap_or("") },
                "记录重试失败"
            );
        }
    }

    async fn worker_failed(&self, job: &JobInfo, error: &RetryError) {
        warn!(
            target: "retry_audit",
            { job.id = %job.job_id,
            handler = %job.handler,
            policy.id = job.policy_id,
            parent.id = job.parent_id,
            error.kind = error.kind() },
            "Worker执行失败: {}",
            error
        );
    }
}
