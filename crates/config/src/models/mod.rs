pub mod app_config;
pub mod dispatcher;
pub mod handlers;
pub mod observability;
pub mod storage;

pub use app_config::*;
pub use dispatcher::*;
pub use handlers::*;
pub use observability::*;
pub use storage::*;
