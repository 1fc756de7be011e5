pub mod models;
pub mod validation;

pub use models::{
    AppConfig, DispatcherConfig, HandlersConfig, HttpCalloutConfig, LogConfig, LogFormat,
    MetricsConfig, SelectorConfig, StorageConfig, TransportConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置加载与校验错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    MissingFile(String),

    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("配置解析失败: {0}")]
    Parse(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
