use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use retry_config::StorageConfig;
use retry_errors::RetryResult;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    policy_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_ids TEXT NOT NULL DEFAULT '[]',
    retries_attempted INTEGER NOT NULL DEFAULT 0,
    retry_from INTEGER NULL,
    last_status_code INTEGER NULL,
    last_attempt_at INTEGER NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_candidates
    ON executions (policy_id, kind, status, retries_attempted);
CREATE INDEX IF NOT EXISTS idx_executions_retry_from ON executions (retry_from);
"#;

/// SQLite连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &StorageConfig) -> RetryResult<Self> {
        let mut options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存数据库只存在于单个连接内，连接不能被回收
        options = if config.is_in_memory() {
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(config.max_connections)
        };

        let pool = options.connect(&config.url).await?;
        info!(url = %config.url, "数据库连接池已创建");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> RetryResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("数据库结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> RetryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
