use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};
use retry_domain::MAX_ID_WIDTH;

/// 派发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 可同时调度的异步Worker上限（派发预算大小）
    pub max_concurrent_workers: usize,
    /// 一批最多合并处理的派发事件数
    pub ingress_batch_size: usize,
    /// 某批次因预算耗尽而未调度任何Worker时的退避时间（毫秒）
    pub overflow_backoff_ms: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 50,
            ingress_batch_size: 10,
            overflow_backoff_ms: 1000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_count(
            self.max_concurrent_workers,
            "dispatcher.max_concurrent_workers",
            10000,
        )?;
        ValidationUtils::validate_count(
            self.ingress_batch_size,
            "dispatcher.ingress_batch_size",
            2000,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_timeout_seconds,
            "dispatcher.shutdown_timeout_seconds",
        )?;
        Ok(())
    }
}

/// 派发消息传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 单条消息编码后的最大文本长度
    pub max_payload_len: usize,
    pub max_ids_per_message: usize,
    /// 有界队列容量
    pub queue_capacity: usize,
    pub publish_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_len: 131_072,
            max_ids_per_message: 2000,
            queue_capacity: 1024,
            publish_timeout_ms: 5000,
        }
    }
}

impl ConfigValidator for TransportConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_payload_len < MAX_ID_WIDTH {
            return Err(ConfigError::Validation(format!(
                "transport.max_payload_len must be at least {MAX_ID_WIDTH}"
            )));
        }
        ValidationUtils::validate_count(
            self.max_ids_per_message,
            "transport.max_ids_per_message",
            100_000,
        )?;
        ValidationUtils::validate_count(self.queue_capacity, "transport.queue_capacity", 1_000_000)?;
        if self.publish_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "transport.publish_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 候选选择触发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub enabled: bool,
    /// 六段式CRON表达式（秒 分 时 日 月 周）
    pub schedule: String,
    pub run_on_startup: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 0,15,30,45 * * * *".to_string(),
            run_on_startup: false,
        }
    }
}

impl ConfigValidator for SelectorConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.schedule, "selector.schedule")?;
        ValidationUtils::validate_cron(&self.schedule, "selector.schedule")
    }
}
