use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HandlersConfig {
    /// 未配置时不注册 `http_callout` 处理器
    pub http_callout: Option<HttpCalloutConfig>,
}

impl ConfigValidator for HandlersConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(http) = &self.http_callout {
            http.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCalloutConfig {
    pub endpoint: String,
    #[serde(default = "default_callout_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_callout_timeout() -> u64 {
    30
}

impl ConfigValidator for HttpCalloutConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_url(&self.endpoint, "handlers.http_callout.endpoint")?;
        ValidationUtils::validate_timeout_seconds(
            self.timeout_seconds,
            "handlers.http_callout.timeout_seconds",
        )
    }
}
