use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 30,
        }
    }
}

impl StorageConfig {
    /// 内存数据库只在单个连接内可见
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_url(&self.url, "storage.url")?;
        ValidationUtils::validate_count(self.max_connections as usize, "storage.max_connections", 100)?;
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "storage.connection_timeout_seconds",
        )
    }
}
