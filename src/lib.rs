//! 集成执行记录重试编排引擎
//!
//! 二进制入口之外的应用组装与关闭管理，供集成测试直接使用。

pub mod app;
pub mod shutdown;

pub use app::{Application, RunOnceSummary};
pub use shutdown::ShutdownManager;
