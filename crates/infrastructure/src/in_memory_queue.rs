use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use retry_config::TransportConfig;
use retry_domain::{DispatchMessage, DispatchQueue};
use retry_errors::{RetryError, RetryResult};

/// 内存派发队列
///
/// 基于有界tokio channel，队列满时发布方最多等待 `publish_timeout`，超时视为传输错误。
/// 超过 `max_payload_len` 的消息在发布时即被拒绝。
#[derive(Debug)]
pub struct InMemoryDispatchQueue {
    sender: Mutex<Option<mpsc::Sender<DispatchMessage>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<DispatchMessage>>,
    pending: AtomicUsize,
    capacity: usize,
    publish_timeout: Duration,
    max_payload_len: usize,
}

impl InMemoryDispatchQueue {
    pub fn new(capacity: usize, publish_timeout: Duration, max_payload_len: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        info!(capacity, "创建内存派发队列");
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            capacity,
            publish_timeout,
            max_payload_len,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.queue_capacity,
            Duration::from_millis(config.publish_timeout_ms),
            config.max_payload_len,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 关闭后不再接受新消息，已入队的消息仍可取出
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            if sender.take().is_some() {
                info!("内存派发队列已关闭");
            }
        }
    }

    fn sender(&self) -> RetryResult<mpsc::Sender<DispatchMessage>> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| RetryError::Internal("派发队列锁已损坏".to_string()))?;
        guard.clone().ok_or(RetryError::QueueClosed)
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn publish(&self, message: DispatchMessage) -> RetryResult<()> {
        if message.encoded_len() > self.max_payload_len {
            return Err(RetryError::transport(format!(
                "消息长度 {} 超过传输上限 {}",
                message.encoded_len(),
                self.max_payload_len
            )));
        }

        let sender = self.sender()?;
        let message_id = message.message_id.clone();
        self.pending.fetch_add(1, Ordering::SeqCst);

        let result = match tokio::time::timeout(self.publish_timeout, sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RetryError::QueueClosed),
            Err(_) => {
                warn!(message.id = %message_id, "派发队列已满，发布超时");
                Err(RetryError::transport("发布派发消息超时"))
            }
        };

        if result.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        } else {
            debug!(message.id = %message_id, "派发消息已入队");
        }
        result
    }

    async fn receive_batch(&self, max: usize) -> RetryResult<Vec<DispatchMessage>> {
        let mut receiver = self.receiver.lock().await;
        let first = receiver.recv().await.ok_or(RetryError::QueueClosed)?;

        let mut batch = vec![first];
        while batch.len() < max.max(1) {
            match receiver.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        self.pending.fetch_sub(batch.len(), Ordering::SeqCst);
        Ok(batch)
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
