use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use retry_config::AppConfig;
use retry_dispatcher::{
    CandidateSelector, DispatchBudget, DispatchConsumer, DispatchReport, OverflowRepublisher,
    RetryDispatcher, SelectionReport, SelectionTrigger,
};
use retry_domain::{DispatchQueue, ExecutionRepository, MessageChunker, PolicyRepository};
use retry_infrastructure::{
    ConfigPolicyRepository, DatabaseManager, InMemoryDispatchQueue, SqliteExecutionRepository,
};
use retry_worker::{
    register_builtin_handlers, HandlerRegistry, RepositoryOutcomeRecorder, TracingAuditLog,
    WorkerHost,
};

/// 单次运行模式的结果
#[derive(Debug)]
pub struct RunOnceSummary {
    pub selection: SelectionReport,
    pub dispatches: Vec<DispatchReport>,
    /// 所有Worker是否在关闭超时内结束
    pub drained: bool,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    executions: Arc<dyn ExecutionRepository>,
    queue: Arc<InMemoryDispatchQueue>,
    budget: DispatchBudget,
    host: Arc<WorkerHost>,
    selector: Arc<CandidateSelector>,
    consumer: Arc<DispatchConsumer>,
}

impl Application {
    /// 创建新的应用实例，只注册内置处理器
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_registry(config, HandlerRegistry::new()).await
    }

    /// 在调用方预先注册的处理器基础上组装应用
    pub async fn with_registry(config: AppConfig, mut registry: HandlerRegistry) -> Result<Self> {
        info!(
            policies = config.policies.len(),
            budget = config.dispatcher.max_concurrent_workers,
            "初始化重试编排应用"
        );

        let database = DatabaseManager::new(&config.storage)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("初始化数据库结构失败")?;

        let executions: Arc<dyn ExecutionRepository> =
            Arc::new(SqliteExecutionRepository::new(database.pool().clone()));
        let policies: Arc<dyn PolicyRepository> =
            Arc::new(ConfigPolicyRepository::new(config.policies.clone()));

        let queue = Arc::new(InMemoryDispatchQueue::from_config(&config.transport));
        let dispatch_queue: Arc<dyn DispatchQueue> = queue.clone();

        register_builtin_handlers(&mut registry, &config.handlers)
            .context("注册内置处理器失败")?;
        info!(handlers = ?registry.handler_names(), "处理器注册完成");

        let host = Arc::new(
            WorkerHost::new(Arc::new(TracingAuditLog))
                .with_recorder(Arc::new(RepositoryOutcomeRecorder::new(executions.clone()))),
        );

        let chunker = MessageChunker::new(
            config.transport.max_ids_per_message,
            config.transport.max_payload_len,
        )
        .context("创建消息分块器失败")?;
        let budget = DispatchBudget::new(config.dispatcher.max_concurrent_workers);

        let dispatcher = Arc::new(RetryDispatcher::new(
            executions.clone(),
            policies.clone(),
            Arc::new(registry),
            budget.clone(),
            host.clone(),
            OverflowRepublisher::new(chunker, dispatch_queue.clone()),
        ));
        let selector = Arc::new(CandidateSelector::new(
            policies,
            executions.clone(),
            chunker,
            dispatch_queue.clone(),
        ));
        let consumer = Arc::new(
            DispatchConsumer::new(
                dispatch_queue,
                dispatcher,
                config.dispatcher.ingress_batch_size,
                Duration::from_millis(config.dispatcher.overflow_backoff_ms),
            )
            .with_drain_timeout(Duration::from_secs(
                config.dispatcher.shutdown_timeout_seconds,
            )),
        );

        Ok(Self {
            config,
            database,
            executions,
            queue,
            budget,
            host,
            selector,
            consumer,
        })
    }

    pub fn executions(&self) -> Arc<dyn ExecutionRepository> {
        Arc::clone(&self.executions)
    }

    pub fn budget(&self) -> &DispatchBudget {
        &self.budget
    }

    /// 常驻运行：定时候选选择 + 派发消费，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动重试编排服务");

        let trigger_handle = if self.config.selector.enabled {
            let trigger = SelectionTrigger::new(
                Arc::clone(&self.selector),
                &self.config.selector.schedule,
                self.config.selector.run_on_startup,
            )
            .context("创建候选选择触发器失败")?;
            let shutdown_rx = shutdown_rx.resubscribe();
            Some(tokio::spawn(async move { trigger.run(shutdown_rx).await }))
        } else {
            warn!("候选选择已禁用，只处理队列中的派发消息");
            None
        };

        let consumer_handle = {
            let consumer = Arc::clone(&self.consumer);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { consumer.run(shutdown_rx).await })
        };

        let _ = shutdown_rx.recv().await;
        info!("重试编排服务收到关闭信号");

        if let Some(handle) = trigger_handle {
            if let Err(e) = handle.await {
                error!("候选选择触发器异常退出: {}", e);
            }
        }
        if let Err(e) = consumer_handle.await {
            error!("派发消费者异常退出: {}", e);
        }

        self.shutdown().await;
        Ok(())
    }

    /// 单次运行：执行一次候选选择，处理完队列并等待所有Worker结束
    pub async fn run_once(&self) -> Result<RunOnceSummary> {
        let selection = self
            .selector
            .select_and_publish(Utc::now())
            .await
            .context("候选选择失败")?;
        let dispatches = self.consumer.drain().await.context("处理派发消息失败")?;
        let drained = self.wait_for_workers().await;

        info!(
            candidates = selection.candidates,
            batches = dispatches.len(),
            drained = drained,
            "单次运行完成"
        );
        Ok(RunOnceSummary {
            selection,
            dispatches,
            drained,
        })
    }

    /// 等待运行中的Worker，超时后中止剩余的Worker
    async fn wait_for_workers(&self) -> bool {
        let timeout = Duration::from_secs(self.config.dispatcher.shutdown_timeout_seconds);
        if self.host.wait_for_idle(timeout).await {
            return true;
        }
        let aborted = self.host.abort_all().await;
        warn!(aborted = aborted, "等待Worker结束超时");
        false
    }

    pub async fn shutdown(&self) {
        self.queue.close();
        let pending = self.queue.pending();
        if pending > 0 {
            warn!(pending = pending, "关闭时仍有未处理的派发消息，候选将在下一次选择时重新发现");
        }
        self.wait_for_workers().await;
        self.database.close().await;
        info!("重试编排服务已停止");
    }
}
