//! 重试Worker：处理器契约、按名称解析的注册表、异步执行宿主以及完成后的持久化

pub mod audit;
pub mod handlers;
pub mod host;
pub mod job;
pub mod post_process;
pub mod registry;
pub mod worker;

pub use audit::{AuditLog, TracingAuditLog};
pub use handlers::register_builtin_handlers;
pub use host::WorkerHost;
pub use job::{JobInfo, WorkerCompletion, WorkerJob, WorkerScheduler};
pub use post_process::{OutcomeRecorder, RepositoryOutcomeRecorder};
pub use registry::{FreshFactory, HandlerRegistration, HandlerRegistry, RetryFactory};
pub use worker::{FreshInit, RecordOutcome, RetryInit, RetryableWorker, WorkerReport, WorkerState};
