use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::registry::HandlerRegistry;
use crate::worker::{FreshInit, RecordOutcome, RetryInit, RetryableWorker, WorkerReport};
use retry_config::HttpCalloutConfig;
use retry_domain::{ExecutionId, ExecutionRecord};
use retry_errors::{RetryError, RetryResult};

pub const HTTP_CALLOUT_HANDLER: &str = "http_callout";

/// 单条记录的外呼请求体
#[derive(Debug, Clone, Serialize)]
struct CalloutRequest<'a> {
    policy_id: i64,
    record_id: &'a str,
    attempt: i32,
    retry_from: Option<ExecutionId>,
}

/// 对每个业务记录ID发送一次JSON POST的通用处理器
pub struct HttpCalloutWorker {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    execution: ExecutionRecord,
    record_ids: Vec<String>,
    parent: Option<ExecutionRecord>,
}

impl HttpCalloutWorker {
    pub fn fresh(client: reqwest::Client, config: &HttpCalloutConfig, init: FreshInit) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            headers: config.headers.clone(),
            execution: init.execution,
            record_ids: init.record_ids,
            parent: None,
        }
    }

    pub fn retry(client: reqwest::Client, config: &HttpCalloutConfig, init: RetryInit) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            headers: config.headers.clone(),
            execution: init.child,
            record_ids: init.record_ids,
            parent: Some(init.parent),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.parent.is_some()
    }

    fn attempt(&self) -> i32 {
        self.parent
            .as_ref()
            .map(|p| p.retries_attempted)
            .unwrap_or(self.execution.retries_attempted)
    }

    async fn call(&self, record_id: &str) -> RecordOutcome {
        let body = CalloutRequest {
            policy_id: self.execution.policy_id,
            record_id,
            attempt: self.attempt(),
            retry_from: self.parent.as_ref().map(|p| p.id),
        };
        let request_text = serde_json::to_string(&body).ok();

        let mut request = self.client.post(&self.endpoint).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let response_text = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
                debug!(record.id = record_id, status = status.as_u16(), "外呼完成");

                let outcome = if status.is_success() {
                    RecordOutcome::succeeded(record_id, Some(status.as_u16()))
                } else {
                    RecordOutcome::failed(
                        record_id,
                        Some(status.as_u16()),
                        format!("HTTP请求失败，状态码: {}", status.as_u16()),
                    )
                };
                outcome.with_payloads(request_text, Some(response_text))
            }
            Err(e) => {
                warn!(record.id = record_id, "外呼失败: {}", e);
                RecordOutcome::failed(record_id, e.status().map(|s| s.as_u16()), e.to_string())
                    .with_payloads(request_text, None)
            }
        }
    }
}

#[async_trait]
impl RetryableWorker for HttpCalloutWorker {
    fn handler_name(&self) -> &str {
        HTTP_CALLOUT_HANDLER
    }

    async fn run(&mut self) -> RetryResult<WorkerReport> {
        info!(
            endpoint = %self.endpoint,
            records = self.record_ids.len(),
            retry = self.is_retry(),
            "开始HTTP外呼"
        );

        let mut outcomes = Vec::with_capacity(self.record_ids.len());
        for record_id in &self.record_ids {
            outcomes.push(self.call(record_id).await);
        }
        Ok(WorkerReport::new(outcomes))
    }
}

pub fn build_client(config: &HttpCalloutConfig) -> RetryResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| RetryError::handler_init(HTTP_CALLOUT_HANDLER, e.to_string()))
}

pub fn register(registry: &mut HandlerRegistry, config: &HttpCalloutConfig) -> RetryResult<()> {
    let client = build_client(config)?;

    let fresh_client = client.clone();
    let fresh_config = config.clone();
    let retry_config = config.clone();
    registry.register(
        HTTP_CALLOUT_HANDLER,
        move |init| {
            Ok(Box::new(HttpCalloutWorker::fresh(
                fresh_client.clone(),
                &fresh_config,
                init,
            )) as Box<dyn RetryableWorker>)
        },
        move |init| {
            Ok(Box::new(HttpCalloutWorker::retry(client.clone(), &retry_config, init))
                as Box<dyn RetryableWorker>)
        },
    );
    Ok(())
}
