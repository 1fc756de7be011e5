use async_trait::async_trait;

use crate::message::DispatchMessage;
use retry_errors::RetryResult;

/// 派发消息的入口队列
///
/// 候选选择器与溢出重发器向同一个队列发布消息，派发消费者从中批量取出。
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn publish(&self, message: DispatchMessage) -> RetryResult<()>;

    /// 等待至少一条消息，然后最多返回 `max` 条；队列关闭且为空时返回 `QueueClosed`
    async fn receive_batch(&self, max: usize) -> RetryResult<Vec<DispatchMessage>>;

    /// 当前积压的消息数量
    fn pending(&self) -> usize;
}
