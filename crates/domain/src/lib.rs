//! 重试编排的领域模型
//!
//! 包含集成策略、执行记录、派发消息及其分块规则，以及仓储与派发队列的抽象端口。
//! 本crate不依赖任何基础设施实现。

pub mod entities;
pub mod message;
pub mod messaging;
pub mod repositories;

pub use entities::*;
pub use message::*;
pub use messaging::*;
pub use repositories::*;
pub use retry_errors::{RetryError, RetryResult};
