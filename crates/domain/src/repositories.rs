//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{ExecutionId, ExecutionRecord, IntegrationPolicy};
use retry_errors::RetryResult;

/// 集成策略仓储（只读）
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> RetryResult<Option<IntegrationPolicy>>;
    async fn get_enabled(&self) -> RetryResult<Vec<IntegrationPolicy>>;
}

/// 执行记录仓储
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, record: &ExecutionRecord) -> RetryResult<ExecutionRecord>;
    async fn get_by_id(&self, id: ExecutionId) -> RetryResult<Option<ExecutionRecord>>;
    /// 批量加载，找不到的ID直接忽略，返回顺序不做保证
    async fn get_by_ids(&self, ids: &[ExecutionId]) -> RetryResult<Vec<ExecutionRecord>>;
    async fn update(&self, record: &ExecutionRecord) -> RetryResult<()>;
    /// 候选查询：按策略的重试阈值过滤，只返回ID（升序），不修改任何数据
    async fn find_retry_candidates(
        &self,
        policy: &IntegrationPolicy,
        now: DateTime<Utc>,
    ) -> RetryResult<Vec<ExecutionId>>;
}
