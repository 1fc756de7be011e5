use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, instrument};

use retry_domain::{
    DispatchQueue, ExecutionId, ExecutionRepository, MessageChunker, MessageChunks, MessageOrigin,
    PolicyRepository,
};
use retry_errors::RetryResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionReport {
    pub policies: usize,
    pub candidates: usize,
    pub messages_published: usize,
}

/// 候选选择器
///
/// 对每个启用的集成策略执行只读的候选查询，合并结果后按传输限制切分为派发消息。
pub struct CandidateSelector {
    policies: Arc<dyn PolicyRepository>,
    executions: Arc<dyn ExecutionRepository>,
    chunker: MessageChunker,
    queue: Arc<dyn DispatchQueue>,
}

impl CandidateSelector {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        executions: Arc<dyn ExecutionRepository>,
        chunker: MessageChunker,
        queue: Arc<dyn DispatchQueue>,
    ) -> Self {
        Self {
            policies,
            executions,
            chunker,
            queue,
        }
    }

    /// 返回升序、去重后的候选ID
    pub async fn select(&self, now: DateTime<Utc>) -> RetryResult<Vec<ExecutionId>> {
        Ok(self.select_with_policy_count(now).await?.1)
    }

    async fn select_with_policy_count(
        &self,
        now: DateTime<Utc>,
    ) -> RetryResult<(usize, Vec<ExecutionId>)> {
        let mut policies = self.policies.get_enabled().await?;
        policies.sort_by_key(|p| p.id);

        let mut ids = Vec::new();
        for policy in &policies {
            let found = self.executions.find_retry_candidates(policy, now).await?;
            debug!(
                policy.id = policy.id,
                policy.name = %policy.name,
                candidates = found.len(),
                "策略候选查询完成"
            );
            ids.extend(found);
        }
        ids.sort_unstable();
        ids.dedup();

        Ok((policies.len(), ids))
    }

    /// 惰性地把候选切分为派发消息
    pub fn messages<'a>(&self, ids: &'a [ExecutionId]) -> MessageChunks<'a> {
        self.chunker.chunks(MessageOrigin::Selection, ids)
    }

    #[instrument(skip_all, fields(now = %now))]
    pub async fn select_and_publish(&self, now: DateTime<Utc>) -> RetryResult<SelectionReport> {
        let (policies, ids) = self.select_with_policy_count(now).await?;
        counter!("retry_candidates_selected_total").increment(ids.len() as u64);

        let mut published = 0;
        for message in self.messages(&ids) {
            self.queue.publish(message).await?;
            published += 1;
        }
        counter!("retry_messages_published_total", "origin" => MessageOrigin::Selection.as_str())
            .increment(published as u64);

        info!(
            policies = policies,
            candidates = ids.len(),
            messages = published,
            "候选选择完成"
        );
        Ok(SelectionReport {
            policies,
            candidates: ids.len(),
            messages_published: published,
        })
    }
}
