//! 重试派发器
//!
//! 单次派发按消息中的ID顺序逐个处理候选，在派发预算耗尽时立即停止，
//! 剩余候选整体交给溢出重发器，不跳过也不等待。

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::budget::DispatchBudget;
use crate::overflow::OverflowRepublisher;
use retry_domain::{
    DispatchMessage, ExecutionId, ExecutionRecord, ExecutionRepository, IntegrationPolicy,
    ParsedIds, PolicyRepository,
};
use retry_errors::{RetryError, RetryResult};
use retry_worker::{HandlerRegistry, RetryInit, WorkerJob, WorkerScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HaltReason {
    /// 所有候选都已处理
    Completed,
    /// 预算耗尽，剩余候选进入溢出
    BudgetExhausted,
    /// 遇到不属于单个候选的错误，当前及剩余候选进入溢出
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbandonedCandidate {
    pub id: ExecutionId,
    pub kind: &'static str,
    pub reason: String,
}

/// 单次派发的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    /// 调用开始时观察到的可用名额
    pub budget_snapshot: usize,
    pub scheduled: Vec<ExecutionId>,
    /// 不存在或没有重试ID的记录
    pub skipped: Vec<ExecutionId>,
    pub malformed: Vec<String>,
    pub abandoned: Vec<AbandonedCandidate>,
    pub overflow: Vec<ExecutionId>,
    pub republished_messages: usize,
    /// 已重新入队的溢出ID数量，总是 `overflow` 的前缀
    pub republished_ids: usize,
    /// 溢出重新入队失败时的错误
    pub republish_error: Option<String>,
    /// 停止处理时候选列表中的位置
    pub halted_at: Option<usize>,
    pub halt: HaltReason,
    /// 导致 `HaltReason::Interrupted` 的错误
    pub halt_error: Option<String>,
}

impl DispatchReport {
    fn new(budget_snapshot: usize, malformed: Vec<String>) -> Self {
        Self {
            budget_snapshot,
            scheduled: Vec::new(),
            skipped: Vec::new(),
            malformed,
            abandoned: Vec::new(),
            overflow: Vec::new(),
            republished_messages: 0,
            republished_ids: 0,
            republish_error: None,
            halted_at: None,
            halt: HaltReason::Completed,
            halt_error: None,
        }
    }

    /// 本批没有调度任何Worker且全部候选都进入了溢出
    pub fn fully_overflowed(&self) -> bool {
        self.scheduled.is_empty() && !self.overflow.is_empty()
    }
}

pub struct RetryDispatcher {
    executions: Arc<dyn ExecutionRepository>,
    policies: Arc<dyn PolicyRepository>,
    registry: Arc<HandlerRegistry>,
    budget: DispatchBudget,
    scheduler: Arc<dyn WorkerScheduler>,
    overflow: OverflowRepublisher,
}

impl RetryDispatcher {
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        policies: Arc<dyn PolicyRepository>,
        registry: Arc<HandlerRegistry>,
        budget: DispatchBudget,
        scheduler: Arc<dyn WorkerScheduler>,
        overflow: OverflowRepublisher,
    ) -> Self {
        Self {
            executions,
            policies,
            registry,
            budget,
            scheduler,
            overflow,
        }
    }

    pub fn budget(&self) -> &DispatchBudget {
        &self.budget
    }

    pub async fn dispatch(&self, message: &DispatchMessage) -> RetryResult<DispatchReport> {
        let span = info_span!(
            "dispatch_cycle",
            message.id = %message.message_id,
            origin = message.origin.as_str()
        );
        self.dispatch_parsed(message.parse_ids()).instrument(span).await
    }

    /// 同一批到达的多条消息先合并ID集合再派发
    pub async fn dispatch_batch(&self, messages: &[DispatchMessage]) -> RetryResult<DispatchReport> {
        let mut parsed = ParsedIds::default();
        for message in messages {
            parsed.merge(message.parse_ids());
        }
        let span = info_span!("dispatch_cycle", messages = messages.len());
        self.dispatch_parsed(parsed).instrument(span).await
    }

    async fn dispatch_parsed(&self, parsed: ParsedIds) -> RetryResult<DispatchReport> {
        let budget_snapshot = self.budget.available();
        let mut report = DispatchReport::new(budget_snapshot, parsed.malformed);
        for raw in &report.malformed {
            warn!(raw = %raw, "忽略无效的执行记录ID");
            counter!("retry_candidates_abandoned_total", "reason" => "malformed_id").increment(1);
        }

        let candidates = self.load_candidates(&parsed.ids, &mut report).await?;
        debug!(
            candidates = candidates.len(),
            skipped = report.skipped.len(),
            budget = budget_snapshot,
            "开始派发候选"
        );

        let mut policies: HashMap<i64, RetryResult<IntegrationPolicy>> = HashMap::new();

        for (index, mut parent) in candidates.iter().cloned().enumerate() {
            if report.scheduled.len() >= budget_snapshot {
                report.halted_at = Some(index);
                break;
            }
            let Some(slot) = self.budget.try_acquire() else {
                report.halted_at = Some(index);
                break;
            };

            parent.record_attempt();
            let child = parent.spawn_retry_child();
            let parent_id = parent.id;

            let policy = match policies.get(&parent.policy_id) {
                Some(cached) => clone_result(cached),
                None => {
                    let loaded = self.load_policy(parent.policy_id).await;
                    let result = clone_result(&loaded);
                    policies.insert(parent.policy_id, loaded);
                    result
                }
            };

            let scheduled = match policy {
                Ok(policy) => self.schedule(policy, parent, child, slot).await,
                Err(e) => Err(e),
            };

            match scheduled {
                Ok(()) => {
                    counter!("retry_workers_scheduled_total").increment(1);
                    report.scheduled.push(parent_id);
                }
                Err(e) if !e.is_candidate_scoped() => {
                    warn!(execution.id = parent_id, error.kind = e.kind(), "派发中断: {}", e);
                    report.halted_at = Some(index);
                    report.halt = HaltReason::Interrupted;
                    report.halt_error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(execution.id = parent_id, error.kind = e.kind(), "放弃候选: {}", e);
                    counter!("retry_candidates_abandoned_total", "reason" => e.kind())
                        .increment(1);
                    report.abandoned.push(AbandonedCandidate {
                        id: parent_id,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(index) = report.halted_at {
            if report.halt == HaltReason::Completed {
                report.halt = HaltReason::BudgetExhausted;
            }
            report.overflow = candidates[index..].iter().map(|r| r.id).collect();
            counter!("retry_overflow_candidates_total").increment(report.overflow.len() as u64);
            warn!(
                halted_at = index,
                halt = ?report.halt,
                overflow = report.overflow.len(),
                "派发提前停止，剩余候选进入溢出"
            );

            let outcome = self.overflow.republish(&report.overflow).await;
            report.republished_messages = outcome.messages;
            report.republished_ids = outcome.ids;
            if let Some(e) = outcome.error {
                warn!(
                    unsent = ?&report.overflow[outcome.ids..],
                    "溢出候选重新入队失败: {}",
                    e
                );
                report.republish_error = Some(e.to_string());
            }
        }

        info!(
            scheduled = report.scheduled.len(),
            skipped = report.skipped.len(),
            malformed = report.malformed.len(),
            abandoned = report.abandoned.len(),
            overflow = report.overflow.len(),
            halt = ?report.halt,
            "派发周期结束"
        );
        Ok(report)
    }

    /// 按消息中的顺序加载候选，跳过不存在或没有重试ID的记录
    async fn load_candidates(
        &self,
        ids: &[ExecutionId],
        report: &mut DispatchReport,
    ) -> RetryResult<Vec<ExecutionRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut loaded: HashMap<ExecutionId, ExecutionRecord> = self
            .executions
            .get_by_ids(ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let mut candidates = Vec::with_capacity(loaded.len());
        for id in ids {
            match loaded.remove(id) {
                Some(record) if record.is_retryable() => candidates.push(record),
                Some(_) => {
                    debug!(execution.id = id, "执行记录没有重试ID，跳过");
                    report.skipped.push(*id);
                }
                None => {
                    debug!(execution.id = id, "执行记录不存在，跳过");
                    report.skipped.push(*id);
                }
            }
        }
        counter!("retry_candidates_skipped_total").increment(report.skipped.len() as u64);
        Ok(candidates)
    }

    async fn load_policy(&self, policy_id: i64) -> RetryResult<IntegrationPolicy> {
        match self.policies.get_by_id(policy_id).await? {
            Some(policy) if policy.enabled => Ok(policy),
            Some(_) => Err(RetryError::PolicyDisabled { id: policy_id }),
            None => Err(RetryError::PolicyNotFound { id: policy_id }),
        }
    }

    async fn schedule(
        &self,
        policy: IntegrationPolicy,
        parent: ExecutionRecord,
        child: ExecutionRecord,
        slot: tokio::sync::OwnedSemaphorePermit,
    ) -> RetryResult<()> {
        let init = RetryInit::new(child.clone(), parent.clone());
        let worker = self.registry.create_retry(&policy.handler, init)?;
        let job = WorkerJob::new(worker, parent, child).with_slot(slot);
        let job_id = self.scheduler.schedule(job).await?;
        debug!(job.id = %job_id, handler = %policy.handler, "Worker已调度");
        Ok(())
    }
}

/// 缓存的策略查询结果，错误按候选逐个重新构造
fn clone_result(result: &RetryResult<IntegrationPolicy>) -> RetryResult<IntegrationPolicy> {
    match result {
        Ok(policy) => Ok(policy.clone()),
        Err(RetryError::PolicyDisabled { id }) => Err(RetryError::PolicyDisabled { id: *id }),
        Err(RetryError::PolicyNotFound { id }) => Err(RetryError::PolicyNotFound { id: *id }),
        Err(e) => Err(RetryError::DatabaseOperation(e.to_string())),
    }
}
