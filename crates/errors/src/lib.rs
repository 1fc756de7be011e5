use thiserror::Error;


/// 重试编排错误类型定义
///
/// 除 `Database`/`Configuration` 之类的环境错误外，其余错误都只作用于单个候选记录
/// 或单个Worker，不会中止整批派发。环境错误中断派发后，未处理的候选重新入队。
/// 预算耗尽不是错误，见调度器的 `HaltReason`。
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("无效的执行记录ID: {raw:?}")]
    MalformedId { raw: String },
    #[error("重试处理器未找到: {name}")]
    HandlerNotFound { name: String },
    #[error("重试处理器不兼容: {name} - {reason}")]
    HandlerNotCompatible { name: String, reason: String },
    #[error("重试处理器初始化失败: {name} - {message}")]
    HandlerInitialization { name: String, message: String },
    #[error("Worker执行失败: {0}")]
    WorkerExecution(String),
    #[error("Worker执行时发生panic: {0}")]
    WorkerPanicked(String),
    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: i64 },
    #[error("集成策略未找到: {id}")]
    PolicyNotFound { id: i64 },
    #[error("集成策略已禁用: {id}")]
    PolicyDisabled { id: i64 },
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("消息传输错误: {0}")]
    Transport(String),
    #[error("派发队列已关闭")]
    QueueClosed,
    #[error("Worker调度失败: {0}")]
    Scheduling(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type RetryResult<T> = Result<T, RetryError>;

impl RetryError {
    pub fn malformed_id<S: Into<String>>(raw: S) -> Self {
        Self::MalformedId { raw: raw.into() }
    }
    pub fn handler_not_found<S: Into<String>>(name: S) -> Self {
        Self::HandlerNotFound { name: name.into() }
    }
    pub fn handler_not_compatible<S: Into<String>, R: Into<String>>(name: S, reason: R) -> Self {
        Self::HandlerNotCompatible {
            name: name.into(),
            reason: reason.into(),
        }
    }
    pub fn handler_init<S: Into<String>, M: Into<String>>(name: S, message: M) -> Self {
        Self::HandlerInitialization {
            name: name.into(),
            message: message.into(),
        }
    }
    pub fn worker_execution<S: Into<String>>(msg: S) -> Self {
        Self::WorkerExecution(msg.into())
    }
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 只影响单个候选记录的错误：记录后放弃该候选，继续处理同一消息中的其余候选。
    /// 其余错误会中断本次派发，未处理的候选进入溢出
    pub fn is_candidate_scoped(&self) -> bool {
        matches!(
            self,
            RetryError::MalformedId { .. }
                | RetryError::HandlerNotFound { .. }
                | RetryError::HandlerNotCompatible { .. }
                | RetryError::HandlerInitialization { .. }
                | RetryError::PolicyNotFound { .. }
                | RetryError::PolicyDisabled { .. }
                | RetryError::Scheduling(_)
        )
    }

    /// 用于指标标签的简短分类名
    pub fn kind(&self) -> &'static str {
        match self {
            RetryError::MalformedId { .. } => "malformed_id",
            RetryError::HandlerNotFound { .. } => "handler_not_found",
            RetryError::HandlerNotCompatible { .. } => "handler_not_compatible",
            RetryError::HandlerInitialization { .. } => "handler_initialization",
            RetryError::WorkerExecution(_) => "worker_execution",
            RetryError::WorkerPanicked(_) => "worker_panicked",
            RetryError::ExecutionNotFound { .. } => "execution_not_found",
            RetryError::PolicyNotFound { .. } => "policy_not_found",
            RetryError::PolicyDisabled { .. } => "policy_disabled",
            RetryError::Database(_) | RetryError::DatabaseOperation(_) => "database",
            RetryError::Transport(_) | RetryError::QueueClosed => "transport",
            RetryError::Scheduling(_) => "scheduling",
            RetryError::Serialization(_) => "serialization",
            RetryError::Configuration(_) | RetryError::InvalidCron { .. } => "configuration",
            RetryError::Network(_) => "network",
            RetryError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for RetryError {
    fn from(err: serde_json::Error) -> Self {
        RetryError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for RetryError {
    fn from(err: anyhow::Error) -> Self {
        RetryError::Internal(err.to_string())
    }
}
