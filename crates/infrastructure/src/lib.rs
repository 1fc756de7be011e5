//! 基础设施实现：SQLite执行记录仓储、配置驱动的策略仓储和内存派发队列

pub mod database;
pub mod in_memory_queue;
pub mod policy_repository;

pub use database::{DatabaseManager, SqliteExecutionRepository};
pub use in_memory_queue::InMemoryDispatchQueue;
pub use policy_repository::ConfigPolicyRepository;
