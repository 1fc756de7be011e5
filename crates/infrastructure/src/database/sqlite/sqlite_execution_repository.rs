use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use retry_domain::{
    ExecutionId, ExecutionKind, ExecutionRecord, ExecutionRepository, ExecutionStatus,
    IntegrationPolicy,
};
use retry_errors::{RetryError, RetryResult};

const COLUMNS: &str = "id, policy_id, kind, status, retry_ids, retries_attempted, retry_from, \
                       last_status_code, last_attempt_at, created_at, updated_at";

/// SQLite单条语句的绑定参数有上限，批量查询按此大小分段
const ID_BATCH: usize = 500;

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> RetryResult<ExecutionRecord> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let retry_ids: String = row.try_get("retry_ids")?;
        let last_status_code: Option<i64> = row.try_get("last_status_code")?;
        let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;

        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            policy_id: row.try_get("policy_id")?,
            kind: kind.parse().map_err(RetryError::Serialization)?,
            status: status.parse().map_err(RetryError::Serialization)?,
            retry_ids: serde_json::from_str(&retry_ids)
                .map_err(|e| RetryError::Serialization(format!("解析retry_ids失败: {e}")))?,
            retries_attempted: row.try_get("retries_attempted")?,
            retry_from: row.try_get("retry_from")?,
            last_status_code: last_status_code.and_then(|code| u16::try_from(code).ok()),
            last_attempt_at: last_attempt_at.map(from_millis).transpose()?,
            created_at: from_millis(row.try_get("created_at")?)?,
            updated_at: from_millis(row.try_get("updated_at")?)?,
        })
    }
}

fn from_millis(millis: i64) -> RetryResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RetryError::Serialization(format!("无效的时间戳: {millis}")))
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, record), fields(policy_id = record.policy_id, kind = %record.kind))]
    async fn create(&self, record: &ExecutionRecord) -> RetryResult<ExecutionRecord> {
        let retry_ids = serde_json::to_string(&record.retry_ids)?;
        // id为0时由数据库分配
        let result = sqlx::query(
            r#"
            INSERT INTO executions (id, policy_id, kind, status, retry_ids, retries_attempted,
                                    retry_from, last_status_code, last_attempt_at, created_at, updated_at)
            VALUES (NULLIF(?, 0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.policy_id)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(retry_ids)
        .bind(record.retries_attempted)
        .bind(record.retry_from)
        .bind(record.last_status_code.map(i64::from))
        .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let mut created = record.clone();
        created.id = result.last_insert_rowid();
        debug!("创建执行记录成功: {}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: ExecutionId) -> RetryResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM executions WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_ids(&self, ids: &[ExecutionId]) -> RetryResult<Vec<ExecutionRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_BATCH) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {COLUMNS} FROM executions WHERE id IN ("));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in &rows {
                records.push(Self::row_to_record(row)?);
            }
        }
        Ok(records)
    }

    async fn update(&self, record: &ExecutionRecord) -> RetryResult<()> {
        let retry_ids = serde_json::to_string(&record.retry_ids)?;
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, retry_ids = ?, retries_attempted = ?, last_status_code = ?,
                last_attempt_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(retry_ids)
        .bind(record.retries_attempted)
        .bind(record.last_status_code.map(i64::from))
        .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
        .bind(record.updated_at.timestamp_millis())
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RetryError::ExecutionNotFound { id: record.id });
        }

        debug!("更新执行记录成功: ID {}", record.id);
        Ok(())
    }

    #[instrument(skip(self, policy), fields(policy_id = policy.id))]
    async fn find_retry_candidates(
        &self,
        policy: &IntegrationPolicy,
        now: DateTime<Utc>,
    ) -> RetryResult<Vec<ExecutionId>> {
        let cutoff = policy
            .retry_interval()
            .and_then(|interval| now.checked_sub_signed(interval))
            .ok_or_else(|| {
                RetryError::config_error(format!(
                    "策略 {} 的重试间隔超出可表示范围: {} 分钟",
                    policy.id, policy.retry_interval_minutes
                ))
            })?
            .timestamp_millis();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM executions
            WHERE policy_id = ? AND kind = ? AND status = ?
              AND retries_attempted < ?
              AND retry_ids <> '[]'
              AND COALESCE(last_attempt_at, created_at) <= ?
            ORDER BY id
            "#
        ))
        .bind(policy.id)
        .bind(ExecutionKind::Egress.as_str())
        .bind(ExecutionStatus::Failed.as_str())
        .bind(policy.max_retries)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        // 状态码过滤与空白ID判断沿用领域规则
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = Self::row_to_record(row)?;
            if record.is_retry_candidate(policy, now) {
                ids.push(record.id);
            }
        }
        debug!(candidates = ids.len(), "候选查询完成");
        Ok(ids)
    }
}
