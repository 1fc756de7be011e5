pub mod http_callout;

pub use http_callout::{HttpCalloutWorker, HTTP_CALLOUT_HANDLER};

use tracing::info;

use crate::registry::HandlerRegistry;
use retry_config::HandlersConfig;
use retry_errors::RetryResult;

/// 按配置注册内置处理器
pub fn register_builtin_handlers(
    registry: &mut HandlerRegistry,
    config: &HandlersConfig,
) -> RetryResult<()> {
    match &config.http_callout {
        Some(http) => {
            http_callout::register(registry, http)?;
        }
        None => info!("未配置 http_callout 处理器，跳过注册"),
    }
    Ok(())
}
