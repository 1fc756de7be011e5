use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    dispatcher::{DispatcherConfig, SelectorConfig, TransportConfig},
    handlers::HandlersConfig,
    observability::{LogConfig, MetricsConfig},
    storage::StorageConfig,
};
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};
use retry_domain::IntegrationPolicy;

/// 重试间隔上限：一年
pub const MAX_RETRY_INTERVAL_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub transport: TransportConfig,
    pub selector: SelectorConfig,
    pub storage: StorageConfig,
    pub logging: LogConfig,
    pub metrics: MetricsConfig,
    pub handlers: HandlersConfig,
    pub policies: Vec<IntegrationPolicy>,
}

impl AppConfig {
    /// 加载配置：可选的TOML文件，然后是 `RETRY__` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(ConfigError::MissingFile(path.to_string()).into());
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/retry.toml", "retry.toml", "/etc/retry/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("RETRY")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    fn validate_policies(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate policy id: {}",
                    policy.id
                )));
            }
            ValidationUtils::validate_not_empty(&policy.name, "policies.name")?;
            ValidationUtils::validate_not_empty(&policy.handler, "policies.handler")?;
            if policy.max_retries < 0 {
                return Err(ConfigError::Validation(format!(
                    "policy {} max_retries must not be negative",
                    policy.id
                )));
            }
            if policy.retry_interval_minutes < 0 {
                return Err(ConfigError::Validation(format!(
                    "policy {} retry_interval_minutes must not be negative",
                    policy.id
                )));
            }
            if policy.retry_interval_minutes > MAX_RETRY_INTERVAL_MINUTES {
                return Err(ConfigError::Validation(format!(
                    "policy {} retry_interval_minutes must not exceed {}",
                    policy.id, MAX_RETRY_INTERVAL_MINUTES
                )));
            }
        }
        Ok(())
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.dispatcher.validate()?;
        self.transport.validate()?;
        self.selector.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        self.metrics.validate()?;
        self.handlers.validate()?;
        self.validate_policies()?;
        Ok(())
    }
}
