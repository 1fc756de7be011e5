use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchReport, RetryDispatcher};
use retry_domain::{DispatchMessage, DispatchQueue};
use retry_errors::{RetryError, RetryResult};

/// 派发消息消费者
///
/// 每次最多取出 `batch_size` 条消息合并派发。某批因预算耗尽而一个Worker都没有调度时，
/// 退避一段时间再继续，避免溢出消息在预算恢复前被反复消费。
pub struct DispatchConsumer {
    queue: Arc<dyn DispatchQueue>,
    dispatcher: Arc<RetryDispatcher>,
    batch_size: usize,
    overflow_backoff: Duration,
    drain_timeout: Option<Duration>,
}

impl DispatchConsumer {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        dispatcher: Arc<RetryDispatcher>,
        batch_size: usize,
        overflow_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            batch_size: batch_size.max(1),
            overflow_backoff,
            drain_timeout: None,
        }
    }

    /// 限制 `drain` 的总时长，超时后剩余消息留在队列中
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(batch_size = self.batch_size, "派发消费者启动");
        loop {
            let batch = tokio::select! {
                batch = self.queue.receive_batch(self.batch_size) => batch,
                _ = shutdown_rx.recv() => {
                    info!("派发消费者收到关闭信号");
                    break;
                }
            };

            let messages = match batch {
                Ok(messages) => messages,
                Err(RetryError::QueueClosed) => {
                    info!("派发队列已关闭，消费者退出");
                    break;
                }
                Err(e) => {
                    error!("接收派发消息失败: {}", e);
                    tokio::time::sleep(self.overflow_backoff).await;
                    continue;
                }
            };

            let backoff = match self.dispatcher.dispatch_batch(&messages).await {
                Ok(report) => report.fully_overflowed(),
                Err(e) => {
                    error!("派发失败，消息重新入队: {}", e);
                    self.requeue(&messages).await;
                    true
                }
            };

            if backoff {
                tokio::select! {
                    _ = tokio::time::sleep(self.overflow_backoff) => {}
                    _ = shutdown_rx.recv() => {
                        info!("派发消费者收到关闭信号");
                        break;
                    }
                }
            }
        }
    }

    /// 处理当前积压的所有消息，包括处理过程中新产生的溢出消息
    pub async fn drain(&self) -> RetryResult<Vec<DispatchReport>> {
        let deadline = self.drain_timeout.map(|timeout| Instant::now() + timeout);
        let mut reports = Vec::new();
        while self.queue.pending() > 0 {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(
                    pending = self.queue.pending(),
                    dispatched_batches = reports.len(),
                    "排空派发队列超时，剩余消息留在队列中"
                );
                break;
            }

            let messages = self.queue.receive_batch(self.batch_size).await?;
            debug!(messages = messages.len(), "收到派发消息");
            let report = self.dispatcher.dispatch_batch(&messages).await?;
            if report.fully_overflowed() {
                let backoff = match deadline {
                    Some(deadline) => self
                        .overflow_backoff
                        .min(deadline.saturating_duration_since(Instant::now())),
                    None => self.overflow_backoff,
                };
                tokio::time::sleep(backoff).await;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    async fn requeue(&self, messages: &[DispatchMessage]) {
        for message in messages {
            if let Err(e) = self.queue.publish(message.clone()).await {
                warn!(message.id = %message.message_id, "消息重新入队失败: {}", e);
            }
        }
    }
}
