use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use retry_domain::{DispatchQueue, ExecutionId, MessageChunker, MessageOrigin};
use retry_errors::RetryError;

/// 一次重发的结果。发布失败时，已经入队的消息仍计入 `messages`
#[derive(Debug, Default)]
pub struct RepublishOutcome {
    pub messages: usize,
    /// 已入队消息覆盖的ID数量
    pub ids: usize,
    pub error: Option<RetryError>,
}

/// 溢出重发器
///
/// 把本周期未派发的ID按原顺序重新分块，发布回候选选择器使用的同一个队列。
pub struct OverflowRepublisher {
    chunker: MessageChunker,
    queue: Arc<dyn DispatchQueue>,
}

impl OverflowRepublisher {
    pub fn new(chunker: MessageChunker, queue: Arc<dyn DispatchQueue>) -> Self {
        Self { chunker, queue }
    }

    /// 遇到第一次发布失败即停止，其后的消息不再尝试
    pub async fn republish(&self, ids: &[ExecutionId]) -> RepublishOutcome {
        let mut outcome = RepublishOutcome::default();
        if ids.is_empty() {
            return outcome;
        }

        let mut chunks = self.chunker.chunks(MessageOrigin::Overflow, ids);
        while let Some(message) = chunks.next() {
            debug!(
                message.id = %message.message_id,
                payload_len = message.encoded_len(),
                "重发溢出消息"
            );
            if let Err(e) = self.queue.publish(message).await {
                warn!(
                    published = outcome.messages,
                    requeued = outcome.ids,
                    overflow = ids.len(),
                    "溢出消息发布失败: {}",
                    e
                );
                outcome.error = Some(e);
                break;
            }
            outcome.messages += 1;
            outcome.ids = chunks.consumed();
        }

        counter!("retry_messages_published_total", "origin" => MessageOrigin::Overflow.as_str())
            .increment(outcome.messages as u64);
        if outcome.error.is_none() {
            info!(
                overflow = ids.len(),
                messages = outcome.messages,
                "溢出候选已重新入队"
            );
        }
        outcome
    }
}
